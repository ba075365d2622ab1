mod common;

use chrono::{Duration, Local, TimeZone};
use common::{local, Harness};
use streak_guard::badge::BadgeState;
use streak_guard::clock::Clock;
use streak_guard::engine::streak::{current_streak, overall_streak};
use streak_guard::model::BlockMode;
use streak_guard::report::StatusReport;
use streak_guard::server::handler::DAY_ROLLOVER_ALARM;
use streak_guard::server::{NavigationEvent, NavigationKind};
use streak_guard::store::keys;

#[tokio::test]
async fn test_visit_resets_streak_and_days_accumulate_after() {
    let h = Harness::new(local(2024, 4, 1, 10));
    let yt = h.site("yt", "youtube.com", BlockMode::Block);
    h.save_sites(&[yt.clone()]).await;

    let outcome = h
        .handler
        .on_navigation(&NavigationEvent::top_level("https://www.youtube.com/watch?v=abc"))
        .await
        .unwrap();
    assert_eq!(outcome.newly_recorded, vec!["yt".to_string()]);

    let ledger = h.repo.ledger().await.unwrap();
    let today = h.clock.today();
    assert!(ledger.visited_on("yt", today));
    assert_eq!(
        current_streak(&yt, ledger.days("yt"), today, &h.config.streak),
        0
    );
    assert_eq!(h.badge.current(), Some(BadgeState::Visited));

    h.clock.advance(Duration::days(3));
    let ledger = h.repo.ledger().await.unwrap();
    assert_eq!(
        current_streak(&yt, ledger.days("yt"), h.clock.today(), &h.config.streak),
        3
    );
    assert_eq!(
        h.handler.refresh_badge().await.unwrap(),
        BadgeState::Clean
    );
}

#[tokio::test]
async fn test_second_visit_same_day_only_moves_last_visit() {
    let h = Harness::new(local(2024, 4, 1, 10));
    h.save_sites(&[h.site("yt", "youtube.com", BlockMode::Off)]).await;
    let mut changes = h.repo.store().subscribe();

    let first = h
        .handler
        .on_navigation(&NavigationEvent::top_level("https://youtube.com/"))
        .await
        .unwrap();
    assert!(first.day_set_changed());
    let change = changes.recv().await.unwrap();
    assert!(change.touches(keys::VISITS_BY_SITE_ID));
    let first_at = h.repo.ledger().await.unwrap().last_visit_at["yt"];

    h.clock.advance(Duration::hours(2));
    let second = h
        .handler
        .on_navigation(&NavigationEvent {
            frame_id: 0,
            url: "https://youtube.com/shorts".into(),
            kind: NavigationKind::HistoryStateUpdated,
        })
        .await
        .unwrap();
    assert!(!second.day_set_changed());
    assert_eq!(second.matched, vec!["yt".to_string()]);

    let change = changes.recv().await.unwrap();
    assert!(!change.touches(keys::VISITS_BY_SITE_ID));
    assert!(change.touches(keys::LAST_VISIT_AT_BY_SITE_ID));

    let ledger = h.repo.ledger().await.unwrap();
    assert_eq!(ledger.days("yt").unwrap().len(), 1);
    assert_eq!(ledger.last_visit_at["yt"], first_at + 2 * 3_600_000);
}

#[tokio::test]
async fn test_subframes_and_unmatched_urls_are_ignored() {
    let h = Harness::new(local(2024, 4, 1, 10));
    h.save_sites(&[h.site("yt", "youtube.com", BlockMode::Off)]).await;

    let outcome = h
        .handler
        .on_navigation(&NavigationEvent {
            frame_id: 3,
            url: "https://youtube.com/embed/x".into(),
            kind: NavigationKind::Committed,
        })
        .await
        .unwrap();
    assert!(outcome.matched.is_empty());

    h.handler
        .on_navigation(&NavigationEvent::top_level("not a url youtube.com"))
        .await
        .unwrap();
    h.handler
        .on_navigation(&NavigationEvent::top_level("https://example.org/"))
        .await
        .unwrap();

    assert!(h.repo.ledger().await.unwrap().visits.is_empty());
    let stats = h.stats.snapshot();
    assert_eq!(stats.navigations, 3);
    assert_eq!(stats.ignored_subframes, 1);
    assert_eq!(stats.matched_navigations, 0);
}

#[tokio::test]
async fn test_one_navigation_can_match_several_sites() {
    let h = Harness::new(local(2024, 4, 1, 10));
    let mut rx = h.site("rx", r"you.*\.com/watch", BlockMode::Off);
    rx.is_regex = true;
    h.save_sites(&[h.site("yt", "youtube", BlockMode::Off), rx])
        .await;

    let outcome = h
        .handler
        .on_navigation(&NavigationEvent::top_level("https://m.YouTube.com/watch?v=1"))
        .await
        .unwrap();
    assert_eq!(outcome.newly_recorded, vec!["yt".to_string(), "rx".to_string()]);
}

#[tokio::test]
async fn test_overall_streak_ignores_sites_added_today() {
    let h = Harness::new(local(2024, 4, 1, 10));
    let old = h.site("old", "old.com", BlockMode::Off);
    h.clock.advance(Duration::days(5));
    let fresh = h.site("fresh", "fresh.com", BlockMode::Off);
    h.save_sites(&[old, fresh]).await;

    let ledger = h.repo.ledger().await.unwrap();
    let sites = h.repo.tracked_sites().await.unwrap();
    assert_eq!(
        overall_streak(&sites, &ledger, h.clock.today(), &h.config.streak),
        6
    );

    let report = StatusReport::load(&h.repo, h.clock.as_ref(), &h.config.streak)
        .await
        .unwrap();
    assert_eq!(report.overall_streak, 6);
    assert_eq!(report.calendar.len(), 6);
    assert_eq!(report.badge, BadgeState::Clean);
}

#[tokio::test]
async fn test_late_visit_counts_one_day_after_local_midnight() {
    let late = Local.with_ymd_and_hms(2024, 4, 10, 23, 30, 0).unwrap();
    let h = Harness::new(late - Duration::days(2));
    let yt = h.site("yt", "youtube.com", BlockMode::Off);
    h.save_sites(&[yt.clone()]).await;
    h.clock.set(late);

    h.handler
        .on_navigation(&NavigationEvent::top_level("https://youtube.com/"))
        .await
        .unwrap();
    assert_eq!(h.handler.refresh_badge().await.unwrap(), BadgeState::Visited);

    h.clock.advance(Duration::hours(1));
    let ledger = h.repo.ledger().await.unwrap();
    assert_eq!(
        current_streak(&yt, ledger.days("yt"), h.clock.today(), &h.config.streak),
        1
    );
    assert_eq!(h.handler.refresh_badge().await.unwrap(), BadgeState::Clean);
}

#[tokio::test]
async fn test_day_rollover_alarm_clears_visited_badge() {
    let late = Local.with_ymd_and_hms(2024, 4, 10, 23, 30, 0).unwrap();
    let h = Harness::new(late);
    h.save_sites(&[h.site("yt", "youtube.com", BlockMode::Off)]).await;
    h.handler.on_startup().await.unwrap();

    let midnight = Local.with_ymd_and_hms(2024, 4, 11, 0, 0, 0).unwrap();
    assert_eq!(
        h.scheduler.armed(DAY_ROLLOVER_ALARM),
        Some(midnight.timestamp_millis())
    );

    h.handler
        .on_navigation(&NavigationEvent::top_level("https://youtube.com/"))
        .await
        .unwrap();
    assert_eq!(h.badge.current(), Some(BadgeState::Visited));

    h.clock.advance(Duration::hours(1));
    assert_eq!(h.fire_due_alarms().await, 1);
    assert_eq!(h.badge.current(), Some(BadgeState::Clean));
    assert_eq!(
        h.scheduler.armed(DAY_ROLLOVER_ALARM),
        Some((midnight + Duration::days(1)).timestamp_millis())
    );
}
