//! LAN service discovery adapter (C1): announce this process as a
//! Receiver, or browse for Receivers advertised by others.
//!
//! Wraps `mdns-sd` so the rest of the session engine never touches the
//! DNS-SD wire format directly. `browse` deliberately hands back
//! snapshots of "the current peer set", not a per-event journal — a slow
//! consumer simply observes the latest snapshot once it looks, which is
//! what `tokio::sync::watch` gives us for free.

use std::{
    collections::HashMap,
    net::IpAddr,
    time::Duration,
};

use lan_file_sharer_common::error::{Result, SessionError};
use lan_file_sharer_entities::ServiceRecord;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// DNS-SD service type for this application, as a fully-qualified mDNS
/// service type string.
pub const SERVICE_TYPE: &str = "_file-sharing._websocket._tcp.local.";

/// Build the per-instance service name: `<hostname>-<first-8-of-uuid>`.
pub fn instance_name() -> String {
    let hostname = hostname_or_fallback();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    format!("{hostname}-{suffix}")
}

fn hostname_or_fallback() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "lan-file-sharer-host".to_string())
}

/// Advertise `record` on every suitable local interface until `cancel`
/// fires, then unregister cleanly.
///
/// Blocks for the lifetime of the announcement; intended to run on its own
/// background task.
pub async fn announce(
    record: &ServiceRecord,
    cancel: CancellationToken,
) -> Result<()> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;

    let mut properties = HashMap::new();
    properties.insert("desc".to_string(), "Local file sender".to_string());

    let host_name = format!("{}.local.", record.name);
    let service_info = ServiceInfo::new(
        &record.service_type,
        &record.name,
        &host_name,
        record.address,
        record.port,
        Some(properties),
    )
    .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;

    let fullname = service_info.get_fullname().to_string();

    daemon
        .register(service_info)
        .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;
    info!(fullname = %fullname, "announcing service record");

    cancel.cancelled().await;

    debug!(fullname = %fullname, "announce cancelled, unregistering");
    if let Err(e) = daemon.unregister(&fullname) {
        warn!(error = %e, "failed to unregister service, continuing shutdown");
    }
    if let Err(e) = daemon.shutdown() {
        warn!(error = %e, "failed to shut down mDNS daemon cleanly");
    }

    Ok(())
}

/// Browse for peers of `service_type`, publishing a deduplicated snapshot
/// of the current peer set on every add/remove event.
///
/// Returns a `watch::Receiver` that always holds the latest snapshot; a
/// consumer that hasn't looked in a while simply sees the most recent
/// state rather than a backlog of intermediate ones. The background task
/// keeps running, and the daemon keeps browsing, until `cancel` fires.
pub fn browse(
    service_type: &str,
    cancel: CancellationToken,
) -> Result<tokio::sync::watch::Receiver<Vec<ServiceRecord>>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;
    let event_receiver = daemon
        .browse(service_type)
        .map_err(|e| SessionError::DiscoveryFailed(e.to_string()))?;

    let (tx, rx) = tokio::sync::watch::channel(Vec::new());

    tokio::spawn(async move {
        let mut peers: HashMap<String, ServiceRecord> = HashMap::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("browse cancelled, stopping mDNS daemon");
                    let _ = daemon.shutdown();
                    break;
                }
                event = event_receiver.recv_async() => {
                    match event {
                        Ok(ServiceEvent::ServiceResolved(info)) => {
                            if let Some(record) = record_from_info(&info) {
                                peers.insert(info.get_fullname().to_string(), record);
                                let _ = tx.send(snapshot(&peers));
                            }
                        }
                        Ok(ServiceEvent::ServiceRemoved(_ty, fullname)) => {
                            peers.remove(&fullname);
                            let _ = tx.send(snapshot(&peers));
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            }
        }
    });

    Ok(rx)
}

fn snapshot(peers: &HashMap<String, ServiceRecord>) -> Vec<ServiceRecord> {
    let mut list: Vec<_> = peers.values().cloned().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    list
}

fn record_from_info(info: &ServiceInfo) -> Option<ServiceRecord> {
    let address: IpAddr = info.get_addresses().iter().next().copied()?;
    Some(ServiceRecord {
        name: info
            .get_fullname()
            .split('.')
            .next()
            .unwrap_or(info.get_fullname())
            .to_string(),
        service_type: SERVICE_TYPE.trim_end_matches('.').to_string(),
        domain: "local".to_string(),
        address,
        port: info.get_port(),
    })
}

/// Small wrapper used only to bound how long a caller waits for the first
/// non-empty browse snapshot, since the watch channel's initial value is
/// always empty.
pub async fn wait_for_first_peer(
    rx: &mut tokio::sync::watch::Receiver<Vec<ServiceRecord>>,
    timeout: Duration,
) -> Result<Vec<ServiceRecord>> {
    tokio::time::timeout(timeout, async {
        loop {
            if !rx.borrow().is_empty() {
                return rx.borrow().clone();
            }
            if rx.changed().await.is_err() {
                return Vec::new();
            }
        }
    })
    .await
    .map_err(|_| SessionError::DiscoveryFailed("no peers found before timeout".into()))
}
