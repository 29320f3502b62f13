mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use gate_api::gateway::connection::{ConnectionHandle, Outbound};
use gate_api::gateway::events::ServerMessage;
use gate_api::gateway::registry::ConnectionRegistry;
use gate_api::provider::credential::CredentialManager;
use gate_api::provider::memory::MemoryProvider;
use gate_api::provider::{Credential, PatronStatus};
use gate_api::tasks::revalidation::{Revalidator, SweepReport};

fn creator_credential(expires_in_secs: i64) -> Credential {
    Credential {
        access_token: "creator-access".into(),
        refresh_token: Some("creator-refresh".into()),
        expires_at: Utc::now() + chrono::Duration::seconds(expires_in_secs),
    }
}

fn rotated_credential() -> Credential {
    Credential {
        access_token: "rotated-access".into(),
        refresh_token: Some("rotated-refresh".into()),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

fn revalidator(
    provider: &Arc<MemoryProvider>,
    registry: &Arc<ConnectionRegistry>,
    credential: Credential,
) -> Arc<Revalidator> {
    revalidator_with_timeout(provider, registry, credential, Duration::from_millis(100))
}

fn revalidator_with_timeout(
    provider: &Arc<MemoryProvider>,
    registry: &Arc<ConnectionRegistry>,
    credential: Credential,
    check_timeout: Duration,
) -> Arc<Revalidator> {
    let credentials = Arc::new(CredentialManager::new(
        provider.clone(),
        credential,
        Duration::from_secs(1),
    ));
    Arc::new(Revalidator::new(
        registry.clone(),
        provider.clone(),
        credentials,
        check_timeout,
    ))
}

#[tokio::test]
async fn sweep_evicts_only_the_confirmed_inactive_member() {
    let provider = Arc::new(MemoryProvider::new());
    let registry = Arc::new(ConnectionRegistry::new());

    let mut receivers = Vec::new();
    for i in 0..5 {
        let user = format!("user-{i}");
        let (handle, rx) = ConnectionHandle::new();
        registry.register_authenticated(&user, handle, "Gold");
        receivers.push((user, rx));
    }
    provider.set_status("user-0", Some(PatronStatus::ActivePatron));
    provider.set_status("user-1", Some(PatronStatus::DeclinedPatron));
    provider.set_status("user-2", Some(PatronStatus::ActivePatron));
    provider.hang_status("user-3");
    provider.fail_status("user-4");

    let report = revalidator(&provider, &registry, creator_credential(3600)).sweep().await;

    assert_eq!(
        report,
        SweepReport {
            checked: 5,
            evicted: 1,
            pruned: 0,
            failed: 2,
            aborted: false,
        }
    );
    assert_eq!(registry.len(), 4);
    assert!(registry.get("user-1").is_none());

    for (user, mut rx) in receivers {
        if user == "user-1" {
            assert_eq!(
                rx.try_recv().unwrap(),
                Outbound::Frame(ServerMessage::error(
                    4002,
                    "Subscription expired or no longer active."
                ))
            );
            assert!(matches!(rx.try_recv().unwrap(), Outbound::Close { code: 4002, .. }));
        } else {
            assert!(rx.try_recv().is_err(), "{user} left untouched");
        }
    }
}

#[tokio::test]
async fn member_missing_from_campaign_is_evicted() {
    let provider = Arc::new(MemoryProvider::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let (handle, _rx) = ConnectionHandle::new();
    registry.register_authenticated("user-gone", handle, "Gold");

    let report = revalidator(&provider, &registry, creator_credential(3600)).sweep().await;
    assert_eq!(report.evicted, 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn expiring_credential_is_refreshed_once_and_reused() {
    let provider = Arc::new(MemoryProvider::new());
    provider.refresh_with(rotated_credential());
    let registry = Arc::new(ConnectionRegistry::new());
    let mut keep = Vec::new();
    for i in 0..3 {
        let user = format!("user-{i}");
        provider.set_status(&user, Some(PatronStatus::ActivePatron));
        let (handle, rx) = ConnectionHandle::new();
        registry.register_authenticated(&user, handle, "Gold");
        keep.push(rx);
    }

    let report = revalidator(&provider, &registry, creator_credential(30)).sweep().await;
    assert_eq!(report.checked, 3);
    assert_eq!(provider.calls().refresh, 1);
    assert_eq!(provider.status_tokens(), vec!["rotated-access"; 3]);
    assert_eq!(registry.len(), 3);
}

#[tokio::test]
async fn credential_crossing_the_margin_mid_sweep_is_refreshed_before_the_next_lookup() {
    let provider = Arc::new(MemoryProvider::new());
    provider.refresh_with(rotated_credential());
    let registry = Arc::new(ConnectionRegistry::new());
    let mut keep = Vec::new();
    for user in ["user-1", "user-2"] {
        provider.hang_status(user);
        let (handle, rx) = ConnectionHandle::new();
        registry.register_authenticated(user, handle, "Gold");
        keep.push(rx);
    }

    // Outside the 60 s margin for the first lookup, inside it once that lookup times out.
    let credential = Credential {
        expires_at: Utc::now() + chrono::Duration::milliseconds(60_400),
        ..creator_credential(0)
    };
    let report =
        revalidator_with_timeout(&provider, &registry, credential, Duration::from_millis(800))
            .sweep()
            .await;

    assert_eq!(report.checked, 2);
    assert_eq!(report.failed, 2);
    assert!(!report.aborted);
    assert_eq!(provider.calls().refresh, 1);
    assert_eq!(provider.status_tokens(), vec!["creator-access", "rotated-access"]);
}

#[tokio::test]
async fn refresh_failure_aborts_the_cycle_without_evicting() {
    let provider = Arc::new(MemoryProvider::new());
    provider.fail_refresh();
    let registry = Arc::new(ConnectionRegistry::new());
    let (handle, mut rx) = ConnectionHandle::new();
    registry.register_authenticated("user-1", handle, "Gold");

    let sweeper = revalidator(&provider, &registry, creator_credential(-10));
    let report = sweeper.sweep().await;
    assert!(report.aborted);
    assert_eq!(report.checked, 0);
    assert_eq!(provider.calls().status, 0);
    assert!(registry.get("user-1").is_some());
    assert!(rx.try_recv().is_err());

    // The next cycle retries the refresh.
    provider.refresh_with(creator_credential(3600));
    provider.set_status("user-1", Some(PatronStatus::ActivePatron));
    let report = sweeper.sweep().await;
    assert!(!report.aborted);
    assert_eq!(report.checked, 1);
    assert_eq!(provider.calls().refresh, 2);
}

#[tokio::test]
async fn closed_connections_are_pruned() {
    let provider = Arc::new(MemoryProvider::new());
    provider.set_status("user-2", Some(PatronStatus::ActivePatron));
    let registry = Arc::new(ConnectionRegistry::new());

    let (dead, dead_rx) = ConnectionHandle::new();
    registry.register_authenticated("user-1", dead, "Gold");
    drop(dead_rx);
    let (live, _live_rx) = ConnectionHandle::new();
    registry.register_authenticated("user-2", live, "Gold");

    let report = revalidator(&provider, &registry, creator_credential(3600)).sweep().await;
    assert_eq!(report.pruned, 1);
    assert_eq!(report.checked, 1);
    assert_eq!(provider.calls().status, 1);
    assert!(registry.get("user-1").is_none());
    assert!(registry.get("user-2").is_some());
}

#[tokio::test]
async fn sweep_evicts_a_live_websocket_with_4002() {
    use futures_util::StreamExt;
    use tokio_tungstenite::tungstenite;

    let (addr, state, provider) = common::start_server().await;
    let token = state.tokens.issue("user-5", "Gold").unwrap();
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws?token={token}"))
        .await
        .expect("ws connect");
    let _authorization = ws.next().await.unwrap().unwrap();

    provider.set_status("user-5", Some(PatronStatus::FormerPatron));
    let report = revalidator(&provider, &state.registry, creator_credential(3600)).sweep().await;
    assert_eq!(report.evicted, 1);

    let body: serde_json::Value = match ws.next().await.unwrap().unwrap() {
        tungstenite::Message::Text(text) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected error frame, got {other:?}"),
    };
    assert_eq!(body["code"], 4002);

    match ws.next().await.unwrap().unwrap() {
        tungstenite::Message::Close(Some(close)) => assert_eq!(u16::from(close.code), 4002),
        other => panic!("expected close 4002, got {other:?}"),
    }
}
