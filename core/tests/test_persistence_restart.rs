mod common;

use common::{crypto, open, FakePeerLink, FixedStore};
use deskbridge_core::transport::ports;
use deskbridge_core::{ConnectionManager, Outbox, TransportConfig};
use std::sync::Arc;

fn manager(link: Arc<FakePeerLink>, outbox: Outbox) -> ConnectionManager {
    ConnectionManager::new(
        TransportConfig::default(),
        crypto(false),
        Arc::new(FixedStore(0)),
        link,
    )
    .with_outbox(Arc::new(outbox))
}

#[tokio::test]
async fn test_queued_commands_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox");

    // First run: peer offline, everything queues
    {
        let link = Arc::new(FakePeerLink::new(false));
        let manager = manager(link, Outbox::persistent(&path).unwrap());
        for command in ["TASK_ADD:a", "TASK_ADD:b", "NOTE_DEL:c"] {
            manager.send_data_command(command).await.unwrap();
        }
        assert_eq!(manager.pending_count(), 3);
    }
    // manager dropped here; sled flushed after each mutation

    // Second run: peer back, replay in the original order
    {
        let link = Arc::new(FakePeerLink::new(true));
        let manager = manager(link.clone(), Outbox::persistent(&path).unwrap());
        assert_eq!(manager.pending_count(), 3);

        let report = manager.flush_outbox().await.unwrap();
        assert_eq!(report.delivered, 3);

        let replayed: Vec<String> = link
            .sent_to(ports::COMMAND)
            .iter()
            .map(|wire| open(crypto(false), wire))
            .collect();
        assert_eq!(replayed, vec!["TASK_ADD:a", "TASK_ADD:b", "NOTE_DEL:c"]);
    }

    // Third run: nothing left
    let outbox = Outbox::persistent(&path).unwrap();
    assert_eq!(outbox.pending_count(), 0);
}

#[tokio::test]
async fn test_partial_flush_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("outbox");

    {
        let link = Arc::new(FakePeerLink::new(false));
        let manager = manager(link.clone(), Outbox::persistent(&path).unwrap());
        for command in ["1", "2", "3"] {
            manager.send_data_command(command).await.unwrap();
        }

        link.set_online(true);
        link.set_send_budget(1);
        let report = manager.flush_outbox().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 2);
    }

    let outbox = Outbox::persistent(&path).unwrap();
    let entries = outbox.entries();
    let commands: Vec<&str> = entries.iter().map(|e| e.command.as_str()).collect();
    assert_eq!(commands, vec!["2", "3"]);
    assert_eq!(entries[0].attempts, 1);
    assert_eq!(entries[1].attempts, 0);

    // New entries go behind the survivors
    outbox.enqueue("4").unwrap();
    let commands: Vec<String> = outbox.entries().into_iter().map(|e| e.command).collect();
    assert_eq!(commands, vec!["2", "3", "4"]);
}
