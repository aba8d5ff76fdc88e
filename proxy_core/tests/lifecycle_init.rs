use std::{
    fs,
    sync::atomic::Ordering,
    time::Duration,
};

use proxy_core::{
    lifecycle::{assets::AssetSyncOutcome, subscription::SYNC_JOB_KEY},
    ServiceCommand,
};
use tokio::time::{sleep, timeout};

mod common;
use common::fake_platform::{FakeCapabilities, Harness};

#[tokio::test]
async fn first_start_copies_assets_and_records_package_time() {
    let harness = Harness::new(FakeCapabilities::plain());
    let (app, _commands) = harness.init();

    assert_eq!(app.data_store().asset_update_time(), Some(harness.package_time));
    let copied = app.storage().no_backup_dir();
    assert_eq!(
        fs::read_to_string(copied.join("gfwlist.acl")).unwrap(),
        "[proxy_all]\n"
    );
    assert!(copied.join("bypass-lan.acl").exists());

    // same package on the next start: nothing is reopened
    let opened = harness.assets.opened.load(Ordering::SeqCst);
    let (app, _commands) = harness.init();
    assert_eq!(harness.assets.opened.load(Ordering::SeqCst), opened);
    assert_eq!(app.sync_assets(), AssetSyncOutcome::UpToDate);
}

#[tokio::test]
async fn failed_copy_keeps_old_timestamp_until_a_retry_succeeds() {
    let mut harness = Harness::new(FakeCapabilities::plain());
    let t0 = harness.package_time;
    drop(harness.init());

    // package updated, but one file cannot be read this time
    harness.package_time = t0 + 500;
    harness.assets.fail_on(Some("gfwlist.acl"));
    let (app, _commands) = harness.init();
    assert_eq!(app.data_store().asset_update_time(), Some(t0));
    assert_eq!(
        app.sync_assets(),
        AssetSyncOutcome::Incomplete {
            copied: 1,
            failed: 1
        }
    );

    // next start retries and finishes
    harness.assets.fail_on(None);
    let (app, _commands) = harness.init();
    assert_eq!(app.data_store().asset_update_time(), Some(t0 + 500));
}

#[tokio::test]
async fn subscription_sync_is_scheduled_once_per_key() {
    let harness = Harness::new(FakeCapabilities::plain());
    {
        let (app, _commands) = harness.init();
        assert!(app.scheduler().scheduled_keys().is_empty(), "off by default");
        app.set_subscription_auto_update(true).unwrap();
    }

    let (app, _commands) = harness.init();
    assert!(app.scheduler().is_scheduled(SYNC_JOB_KEY));
    assert!(!app.schedule_subscription_sync(), "re-registration keeps the job");
    assert!(!app.schedule_subscription_sync());
    assert_eq!(app.scheduler().scheduled_keys(), vec![SYNC_JOB_KEY.to_owned()]);

    timeout(Duration::from_secs(2), async {
        while harness.syncer.syncs.load(Ordering::SeqCst) == 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("the first sync should run right after scheduling");

    app.set_subscription_auto_update(false).unwrap();
    assert!(app.scheduler().scheduled_keys().is_empty());
}

#[tokio::test]
async fn tcp_fast_open_is_enabled_only_when_requested_and_inactive() {
    let harness = Harness::new(FakeCapabilities::plain());
    {
        let (app, _commands) = harness.init();
        assert_eq!(harness.network.enable_calls.load(Ordering::SeqCst), 0);
        app.data_store().set_tcp_fast_open(true).unwrap();
    }

    drop(harness.init());
    assert_eq!(harness.network.enable_calls.load(Ordering::SeqCst), 1);
    assert!(harness.network.enabled.load(Ordering::SeqCst));

    drop(harness.init());
    assert_eq!(
        harness.network.enable_calls.load(Ordering::SeqCst),
        1,
        "already active, so no second attempt"
    );
}

#[tokio::test]
async fn refused_tcp_fast_open_does_not_abort_startup() {
    let harness = Harness::new(FakeCapabilities::plain());
    harness.network.refuse.store(true, Ordering::SeqCst);
    {
        let (app, _commands) = harness.init();
        app.data_store().set_tcp_fast_open(true).unwrap();
    }

    let (app, _commands) = harness.init();
    assert_eq!(harness.network.enable_calls.load(Ordering::SeqCst), 1);
    assert!(!harness.network.enabled.load(Ordering::SeqCst));
    assert_eq!(app.data_store().asset_update_time(), Some(harness.package_time));
}

#[tokio::test]
async fn notification_channels_are_declared_idempotently() {
    let harness = Harness::new(FakeCapabilities::plain());
    drop(harness.init());
    drop(harness.init());

    let ids: Vec<_> = harness
        .notifications
        .channels()
        .into_iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(
        ids,
        vec!["service-proxy", "service-transproxy", "service-vpn", "update"]
    );
}

#[tokio::test]
async fn lifecycle_calls_emit_one_command_each() {
    let harness = Harness::new(FakeCapabilities::plain());
    let (app, mut commands) = harness.init();

    app.start_service();
    app.reload_service();
    app.stop_service();
    app.stop_service();

    let mut received = Vec::new();
    while let Ok(command) = commands.try_recv() {
        received.push(command);
    }
    assert_eq!(
        received,
        vec![
            ServiceCommand::Start,
            ServiceCommand::Reload,
            ServiceCommand::Stop,
            ServiceCommand::Stop
        ]
    );

    // nobody listening any more: still fire-and-forget
    drop(commands);
    app.start_service();
}

#[tokio::test]
async fn builtin_servers_stop_at_the_first_accepted_url() {
    let mut harness = Harness::new(FakeCapabilities::plain());
    harness.builtin_urls = vec![
        "https://a.example/sub".into(),
        "https://b.example/sub".into(),
        "https://c.example/sub".into(),
    ];
    harness.syncer = std::sync::Arc::new(common::fake_platform::CountingSyncer {
        accepted_url: Some("https://b.example/sub".into()),
        ..Default::default()
    });
    let (app, _commands) = harness.init();

    app.update_builtin_servers();

    timeout(Duration::from_secs(2), async {
        while harness.syncer.offered.lock().unwrap().len() < 2 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("background task should run");
    sleep(Duration::from_millis(20)).await;

    assert_eq!(
        *harness.syncer.offered.lock().unwrap(),
        vec!["https://a.example/sub".to_owned(), "https://b.example/sub".to_owned()]
    );
}
