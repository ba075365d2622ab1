mod common;

use common::{local, Harness};
use serde_json::json;
use streak_guard::error::CommandError;
use streak_guard::model::BlockMode;
use streak_guard::server::{Command, NavigationEvent, NewSite, Reply};
use streak_guard::store::Snapshot;

#[tokio::test]
async fn test_startup_seeds_default_sites_once() {
    let h = Harness::new(local(2024, 2, 1, 8));
    h.handler.on_startup().await.unwrap();

    let sites = h.repo.tracked_sites().await.unwrap();
    let ids: Vec<&str> = sites.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["yt", "nf"]);
    assert!(sites.iter().all(|s| s.block_mode == BlockMode::Off));

    h.handler
        .execute(Command::DeleteSite {
            site_id: "nf".into(),
        })
        .await
        .unwrap();
    h.handler.on_startup().await.unwrap();
    assert_eq!(h.repo.tracked_sites().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_add_site_validates_and_generates_id() {
    let h = Harness::new(local(2024, 2, 1, 8));
    h.save_sites(&[]).await;

    let err = h
        .handler
        .execute(Command::AddSite(NewSite {
            label: "  ".into(),
            pattern: "x.com".into(),
            is_regex: false,
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Validation { .. }));

    let err = h
        .handler
        .execute(Command::AddSite(NewSite {
            label: "Broken".into(),
            pattern: "(unclosed".into(),
            is_regex: true,
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Validation { .. }));

    let err = h
        .handler
        .execute(Command::AddSite(NewSite {
            label: "Wildcard".into(),
            pattern: "you*tube.com".into(),
            is_regex: false,
        }))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::Validation { .. }));

    let reply = h
        .handler
        .execute(Command::AddSite(NewSite {
            label: " Reddit ".into(),
            pattern: " reddit.com ".into(),
            is_regex: false,
        }))
        .await
        .unwrap();
    let Reply::Site { site } = reply else {
        panic!("expected a site reply");
    };
    assert!(site.id.starts_with(&format!("site_{}_", h.now_ms())));
    assert_eq!(site.label, "Reddit");
    assert_eq!(site.pattern, "reddit.com");
    assert_eq!(site.block_mode, BlockMode::Off);
    assert_eq!(h.repo.tracked_sites().await.unwrap(), vec![site]);
}

#[tokio::test]
async fn test_delete_site_purges_its_history() {
    let h = Harness::new(local(2024, 2, 1, 8));
    h.save_sites(&[
        h.site("yt", "youtube.com", BlockMode::Block),
        h.site("nf", "netflix.com", BlockMode::Off),
    ])
    .await;
    h.handler
        .on_navigation(&NavigationEvent::top_level("https://youtube.com"))
        .await
        .unwrap();
    h.handler
        .on_navigation(&NavigationEvent::top_level("https://netflix.com"))
        .await
        .unwrap();
    h.handler
        .execute(Command::AllowSiteTemporarily {
            site_id: "yt".into(),
            allow_until_ms: h.now_ms() + 60_000,
        })
        .await
        .unwrap();

    h.handler
        .execute(Command::DeleteSite {
            site_id: "yt".into(),
        })
        .await
        .unwrap();

    let ledger = h.repo.ledger().await.unwrap();
    assert!(ledger.days("yt").is_none());
    assert!(!ledger.last_visit_at.contains_key("yt"));
    assert!(ledger.days("nf").is_some());
    assert!(h.repo.allowances().await.unwrap().is_empty());

    let err = h
        .handler
        .execute(Command::DeleteSite {
            site_id: "yt".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::UnknownSite(_)));
}

#[tokio::test]
async fn test_resets() {
    let h = Harness::new(local(2024, 2, 1, 8));
    h.save_sites(&[
        h.site("yt", "youtube.com", BlockMode::Block),
        h.site("nf", "netflix.com", BlockMode::Off),
    ])
    .await;
    for url in ["https://youtube.com", "https://netflix.com"] {
        h.handler
            .on_navigation(&NavigationEvent::top_level(url))
            .await
            .unwrap();
    }

    h.handler
        .execute(Command::ResetSiteVisits {
            site_id: "yt".into(),
        })
        .await
        .unwrap();
    let ledger = h.repo.ledger().await.unwrap();
    assert!(ledger.days("yt").is_none());
    assert!(ledger.days("nf").is_some());

    h.handler.execute(Command::ResetAllVisits).await.unwrap();
    assert!(h.repo.ledger().await.unwrap().visits.is_empty());

    h.handler.execute(Command::ResetEverything).await.unwrap();
    assert!(h.repo.tracked_sites().await.unwrap().is_empty());
    assert!(h.repo.ledger().await.unwrap().last_visit_at.is_empty());
    assert!(h.rules().await.is_empty());
}

#[tokio::test]
async fn test_motivations_and_journal() {
    let h = Harness::new(local(2024, 2, 1, 8));

    for text in ["Go outside", "Read a book"] {
        h.handler
            .execute(Command::AddMotivation(text.into()))
            .await
            .unwrap();
    }
    h.handler
        .execute(Command::DeleteMotivation(0))
        .await
        .unwrap();
    assert_eq!(h.repo.motivations().await.unwrap(), vec!["Read a book"]);

    let err = h
        .handler
        .execute(Command::DeleteMotivation(5))
        .await
        .unwrap_err();
    assert!(matches!(err, CommandError::OutOfBounds { index: 5, len: 1 }));

    h.handler
        .execute(Command::AddJournalEntry("first".into()))
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::minutes(1));
    h.handler
        .execute(Command::AddJournalEntry("second".into()))
        .await
        .unwrap();

    let journal = h.repo.journal().await.unwrap();
    assert_eq!(journal[0].text, "second");
    assert_eq!(journal[1].text, "first");
    assert!(journal[0].ts > journal[1].ts);

    h.handler
        .execute(Command::DeleteJournalEntry(1))
        .await
        .unwrap();
    assert_eq!(h.repo.journal().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_import_then_export() {
    let h = Harness::new(local(2024, 2, 1, 8));
    let snapshot: Snapshot = serde_json::from_value(json!({
        "trackedSites": [
            {"id": "yt", "label": "YouTube", "pattern": "youtube.com", "isRegex": false,
             "blockMode": "block", "redirectUrl": "", "createdAt": "2024-01-01T00:00:00.000Z"}
        ],
        "visitsBySiteId": {"yt": ["2024-01-20", "2024-01-05"]},
        "motivations": "not a list"
    }))
    .unwrap();

    let reply = h.handler.execute(Command::Import(snapshot)).await.unwrap();
    let Reply::Imported { keys } = reply else {
        panic!("expected an import reply");
    };
    assert_eq!(keys.len(), 2);

    // Imported sites are enforced right away
    assert_eq!(h.rules().await.len(), 1);

    let exported = h.repo.export().await.unwrap();
    assert_eq!(
        exported.visits_by_site_id,
        Some(json!({"yt": ["2024-01-05", "2024-01-20"]}))
    );
    assert_eq!(exported.motivations, Some(json!([])));
}
