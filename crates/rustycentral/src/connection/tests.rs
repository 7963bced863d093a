//! Unit tests for the connection state machine

use super::*;
use crate::gatt::tests::{
    char_id, test_services, INFO, INFO_HANDLE, RX, RX_HANDLE, TX, TX_CONFIG_HANDLE, TX_HANDLE,
};
use crate::gatt::{
    CharacteristicProperties, ConnectionPriority, DiscoveredCharacteristic, ServiceId,
};
use crate::mock::{wait_until, Command, MockAdapter};
use crate::uuid::Uuid;
use std::sync::atomic::{AtomicBool, Ordering};

const LINK_UP: GattEvent = GattEvent::ConnectionStateChanged {
    status: 0x00,
    state: LINK_STATE_CONNECTED,
};

fn connection(adapter: &MockAdapter, config: ConnectionConfig) -> Connection {
    let _ = env_logger::try_init();
    Connection::new(Arc::new(adapter.clone()), PeripheralId::new("P"), config)
}

fn spawn_connect(connection: &Connection) -> JoinHandle<Result<()>> {
    let connection = connection.clone();
    tokio::spawn(async move { connection.connect().await })
}

/// Plays the transport's side of a successful connect.
async fn bring_up(adapter: &MockAdapter, mtu_event: GattEvent, services: Vec<DiscoveredService>) {
    assert!(wait_until(|| adapter.emit(LINK_UP.clone())).await);
    assert!(wait_until(|| adapter.commands().contains(&Command::RequestMtu(MTU_CEILING))).await);
    assert!(adapter.emit(mtu_event));
    assert!(wait_until(|| adapter.commands().contains(&Command::DiscoverAttributes)).await);
    assert!(adapter.emit(GattEvent::AttributesDiscovered {
        status: 0x00,
        services,
    }));
}

async fn connected(config: ConnectionConfig) -> (MockAdapter, Connection) {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, config);
    let attempt = spawn_connect(&connection);
    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 27,
            status: 0x00,
        },
        test_services(),
    )
    .await;
    attempt.await.unwrap().unwrap();
    adapter.clear_commands();
    (adapter, connection)
}

fn drain(changes: &mut broadcast::Receiver<ConnectionState>) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(state) = changes.try_recv() {
        states.push(state);
    }
    states
}

#[test]
fn test_usable_payload_is_clamped() {
    assert_eq!(usable_payload(185), 178);
    assert_eq!(usable_payload(23), MIN_USABLE_PAYLOAD);
    assert_eq!(usable_payload(1024), MAX_USABLE_PAYLOAD);
}

#[tokio::test(start_paused = true)]
async fn test_connect_walks_through_setup_states() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let mut changes = connection.state_changes();

    let service = DiscoveredService {
        uuid: Uuid::from_u16(0x180F),
        handle: 0x0001,
        is_primary: true,
        characteristics: vec![DiscoveredCharacteristic {
            uuid: Uuid::from_u16(0x2A19),
            handle: 0x0003,
            properties: CharacteristicProperties::READ,
            descriptors: Vec::new(),
        }],
    };

    let attempt = spawn_connect(&connection);
    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 185,
            status: 0x00,
        },
        vec![service],
    )
    .await;
    attempt.await.unwrap().unwrap();

    assert_eq!(
        drain(&mut changes),
        vec![
            ConnectionState::Connecting,
            ConnectionState::NegotiatingMtu,
            ConnectionState::DiscoveringAttributes,
            ConnectionState::Connected,
        ]
    );
    assert_eq!(connection.payload_size().await, 178);

    let catalog = connection.catalog().await;
    assert_eq!(catalog.characteristic_count(), 1);
    assert!(catalog
        .characteristic(&ServiceId(Uuid::from_u16(0x180F)).characteristic(0x2A19u16))
        .is_some());
    assert!(adapter
        .commands()
        .contains(&Command::RequestPriority(ConnectionPriority::Balanced)));

    // already connected: nothing new reaches the transport
    connection.connect().await.unwrap();
    assert_eq!(adapter.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_mtu_request_waits_for_settle_delay() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let _attempt = spawn_connect(&connection);

    assert!(wait_until(|| adapter.emit(LINK_UP.clone())).await);
    let link_up_at = tokio::time::Instant::now();
    assert!(wait_until(|| adapter.commands().contains(&Command::RequestMtu(MTU_CEILING))).await);
    assert!(link_up_at.elapsed() >= DEFAULT_SETTLE_DELAY);
}

#[tokio::test(start_paused = true)]
async fn test_failed_mtu_negotiation_falls_back_to_floor() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let attempt = spawn_connect(&connection);

    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 0,
            status: 0x81,
        },
        test_services(),
    )
    .await;

    attempt.await.unwrap().unwrap();
    assert_eq!(connection.payload_size().await, MIN_USABLE_PAYLOAD);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_connects_share_one_attempt() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let first = spawn_connect(&connection);
    let second = spawn_connect(&connection);

    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 247,
            status: 0x00,
        },
        test_services(),
    )
    .await;

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    assert_eq!(adapter.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let timed_out = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&timed_out);
    connection
        .on_timeout(move || flag.store(true, Ordering::SeqCst))
        .await;

    let started = tokio::time::Instant::now();
    let result = connection.connect().await;

    assert_eq!(result, Err(Error::ConnectTimeout));
    assert!(started.elapsed() >= DEFAULT_CONNECT_TIMEOUT);
    assert!(timed_out.load(Ordering::SeqCst));
    assert_eq!(
        connection.state().await,
        ConnectionState::Failed(FailureReason::Timeout)
    );
    assert_eq!(adapter.commands().last(), Some(&Command::Close));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cancelled_once_link_is_up() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let _attempt = spawn_connect(&connection);

    assert!(wait_until(|| adapter.emit(LINK_UP.clone())).await);
    // the MTU response never arrives
    tokio::time::sleep(DEFAULT_CONNECT_TIMEOUT * 2).await;

    assert_eq!(connection.state().await, ConnectionState::NegotiatingMtu);
    assert!(!adapter.commands().contains(&Command::Close));
}

#[tokio::test(start_paused = true)]
async fn test_link_failure_while_connecting() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let attempt = spawn_connect(&connection);

    assert!(wait_until(|| adapter.emit(GattEvent::ConnectionStateChanged {
        status: 0x85,
        state: LINK_STATE_DISCONNECTED,
    }))
    .await);

    let failed = ConnectionState::Failed(FailureReason::Transport(GattStatus::StackError));
    assert_eq!(attempt.await.unwrap(), Err(Error::ConnectFailed(failed)));
    assert_eq!(connection.state().await, failed);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_connect_fails_attempt() {
    let adapter = MockAdapter::new();
    adapter.reject_connects();
    let connection = connection(&adapter, ConnectionConfig::default());

    assert!(matches!(connection.connect().await, Err(Error::Transport(_))));
    assert!(matches!(
        connection.state().await,
        ConnectionState::Failed(FailureReason::Transport(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_discovery_failure() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let attempt = spawn_connect(&connection);

    assert!(wait_until(|| adapter.emit(LINK_UP.clone())).await);
    assert!(wait_until(|| adapter.commands().contains(&Command::RequestMtu(MTU_CEILING))).await);
    adapter.emit(GattEvent::MtuChanged {
        mtu: 100,
        status: 0x00,
    });
    assert!(wait_until(|| adapter.commands().contains(&Command::DiscoverAttributes)).await);
    adapter.emit(GattEvent::AttributesDiscovered {
        status: 0x0101,
        services: Vec::new(),
    });

    let failed = ConnectionState::Failed(FailureReason::Discovery(GattStatus::Failure));
    assert_eq!(attempt.await.unwrap(), Err(Error::ConnectFailed(failed)));
    assert_eq!(adapter.commands().last(), Some(&Command::Close));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_link_state_is_invalid() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    let mut changes = connection.state_changes();

    adapter.emit(GattEvent::ConnectionStateChanged {
        status: 0x00,
        state: 0x07,
    });

    assert_eq!(changes.recv().await.unwrap(), ConnectionState::Invalid(0x07));
    assert_eq!(adapter.commands(), vec![Command::Close]);
}

#[tokio::test(start_paused = true)]
async fn test_submit_requires_connection() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let (tx, rx) = oneshot::channel();

    let result = connection
        .submit(Request::read_characteristic(char_id(INFO), move |result| {
            let _ = tx.send(result);
        }))
        .await;

    assert_eq!(result, Err(Error::Gatt(GattStatus::NoConnection)));
    assert_eq!(rx.await.unwrap(), Err(GattStatus::NoConnection));
    assert!(adapter.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_through_connection() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    let reader = connection.clone();
    let read = tokio::spawn(async move { reader.read_characteristic(char_id(INFO)).await });

    assert!(wait_until(|| adapter.commands() == vec![Command::ReadCharacteristic(INFO_HANDLE)]).await);
    adapter.emit(GattEvent::CharacteristicRead {
        handle: INFO_HANDLE,
        status: 0x00,
        value: vec![0x64],
    });

    assert_eq!(read.await.unwrap(), Ok(vec![0x64]));
}

#[tokio::test(start_paused = true)]
async fn test_chunked_write_completes_after_last_chunk() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    assert_eq!(connection.payload_size().await, 20);

    let value: Vec<u8> = (0..45).collect();
    let writer = connection.clone();
    let payload = value.clone();
    let write = tokio::spawn(async move {
        writer
            .write_characteristic(char_id(RX), payload, WriteType::WithResponse)
            .await
    });

    for sent in 1..=3 {
        assert!(wait_until(|| adapter.writes().len() == sent).await);
        assert!(!write.is_finished());
        adapter.emit(GattEvent::CharacteristicWritten {
            handle: RX_HANDLE,
            status: 0x00,
        });
    }
    assert_eq!(write.await.unwrap(), Ok(()));

    let sizes: Vec<usize> = adapter
        .writes()
        .into_iter()
        .map(|command| match command {
            Command::WriteCharacteristic(_, chunk, _) => chunk.len(),
            _ => 0,
        })
        .collect();
    assert_eq!(sizes, vec![20, 20, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_chunk_resent_before_next_request() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;

    let (write_tx, write_rx) = oneshot::channel();
    connection
        .submit(Request::write_characteristic(
            char_id(RX),
            (0..45).collect(),
            WriteType::WithResponse,
            move |result| {
                let _ = write_tx.send(result);
            },
        ))
        .await
        .unwrap();
    let (read_tx, read_rx) = oneshot::channel();
    connection
        .submit(Request::read_characteristic(char_id(INFO), move |result| {
            let _ = read_tx.send(result);
        }))
        .await
        .unwrap();

    let written = |status: u16| {
        adapter.emit(GattEvent::CharacteristicWritten {
            handle: RX_HANDLE,
            status,
        })
    };
    written(0x00);
    assert!(wait_until(|| adapter.writes().len() == 2).await);
    written(0x8F);
    assert!(wait_until(|| adapter.writes().len() == 3).await);
    written(0x8F);
    assert!(wait_until(|| adapter.writes().len() == 4).await);

    let writes = adapter.writes();
    assert_eq!(writes[1], writes[2]);
    assert_eq!(writes[2], writes[3]);
    assert!(!adapter
        .commands()
        .contains(&Command::ReadCharacteristic(INFO_HANDLE)));

    written(0x00);
    assert!(wait_until(|| adapter.writes().len() == 5).await);
    written(0x00);

    assert_eq!(write_rx.await.unwrap(), Ok(()));
    assert!(wait_until(|| adapter
        .commands()
        .contains(&Command::ReadCharacteristic(INFO_HANDLE)))
    .await);
    adapter.emit(GattEvent::CharacteristicRead {
        handle: INFO_HANDLE,
        status: 0x00,
        value: vec![1],
    });
    assert_eq!(read_rx.await.unwrap(), Ok(vec![1]));
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_fails_pending_requests_in_order() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    let completed = Arc::new(std::sync::Mutex::new(Vec::new()));

    for tag in 0..4 {
        let completed = Arc::clone(&completed);
        connection
            .submit(Request::read_characteristic(char_id(TX), move |result| {
                completed.lock().unwrap().push((tag, result));
            }))
            .await
            .unwrap();
    }
    assert_eq!(adapter.commands(), vec![Command::ReadCharacteristic(TX_HANDLE)]);

    adapter.emit(GattEvent::ConnectionStateChanged {
        status: 0x13,
        state: LINK_STATE_DISCONNECTED,
    });
    assert!(wait_until(|| completed.lock().unwrap().len() == 4).await);

    let completed = completed.lock().unwrap().clone();
    assert_eq!(
        completed,
        (0..4)
            .map(|tag| (tag, Err(GattStatus::NoConnection)))
            .collect::<Vec<_>>()
    );
    assert_eq!(connection.state().await, ConnectionState::Disconnected);
    assert_eq!(
        connection.read_characteristic(char_id(TX)).await,
        Err(Error::Gatt(GattStatus::NoConnection))
    );
}

#[tokio::test(start_paused = true)]
async fn test_soft_disconnect_then_reconnect_in_place() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;

    connection.disconnect().await;
    connection.disconnect().await;
    assert_eq!(connection.state().await, ConnectionState::DisconnectRequested);
    assert_eq!(adapter.commands(), vec![Command::Disconnect]);

    let mut changes = connection.state_changes();
    adapter.emit(GattEvent::ConnectionStateChanged {
        status: 0x16,
        state: LINK_STATE_DISCONNECTED,
    });
    assert_eq!(changes.recv().await.unwrap(), ConnectionState::Disconnected);

    // not connected any more: disconnect is a no-op
    connection.disconnect().await;
    assert_eq!(adapter.commands(), vec![Command::Disconnect]);

    let attempt = spawn_connect(&connection);
    assert!(wait_until(|| adapter.commands().contains(&Command::Reconnect)).await);
    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 27,
            status: 0x00,
        },
        test_services(),
    )
    .await;
    attempt.await.unwrap().unwrap();
    assert_eq!(adapter.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_fully_close_releases_handle() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    let mut changes = connection.state_changes();

    connection.fully_close().await;
    assert_eq!(adapter.commands(), vec![Command::Disconnect, Command::Close]);
    assert_eq!(
        drain(&mut changes),
        vec![
            ConnectionState::DisconnectRequested,
            ConnectionState::Disconnected
        ]
    );

    let attempt = spawn_connect(&connection);
    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 27,
            status: 0x00,
        },
        test_services(),
    )
    .await;
    attempt.await.unwrap().unwrap();
    assert_eq!(adapter.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_observe_on_connect_and_notifications() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default().observe(char_id(TX)));
    let values = connection.observe(char_id(TX));
    tokio::pin!(values);

    let attempt = spawn_connect(&connection);
    bring_up(
        &adapter,
        GattEvent::MtuChanged {
            mtu: 27,
            status: 0x00,
        },
        test_services(),
    )
    .await;
    attempt.await.unwrap().unwrap();

    assert!(wait_until(|| adapter.commands().contains(&Command::WriteDescriptor(
        TX_CONFIG_HANDLE,
        CCCD_ENABLE_NOTIFICATION.to_vec()
    )))
    .await);
    assert!(adapter
        .commands()
        .contains(&Command::SetNotification(TX_HANDLE, true)));
    adapter.emit(GattEvent::DescriptorWritten {
        handle: TX_CONFIG_HANDLE,
        status: 0x00,
    });

    // unknown handles are dropped
    adapter.emit(GattEvent::CharacteristicChanged {
        handle: 0x0042,
        value: vec![0xFF],
    });
    adapter.emit(GattEvent::CharacteristicChanged {
        handle: TX_HANDLE,
        value: vec![0x01, 0x02],
    });
    assert_eq!(values.next().await, Some(vec![0x01, 0x02]));
}

#[tokio::test(start_paused = true)]
async fn test_enable_notify_through_connection() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;

    assert_eq!(
        connection.enable_notify(char_id(INFO)).await,
        Err(Error::CapabilityUnsupported(char_id(INFO)))
    );

    let subscriber = connection.clone();
    let enable = tokio::spawn(async move { subscriber.enable_notify(char_id(TX)).await });
    assert!(wait_until(|| adapter.writes().len() == 1).await);
    adapter.emit(GattEvent::DescriptorWritten {
        handle: TX_CONFIG_HANDLE,
        status: 0x00,
    });
    assert_eq!(enable.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_during_mtu_exchange_fails_attempt() {
    let adapter = MockAdapter::new();
    let connection = connection(&adapter, ConnectionConfig::default());
    let attempt = spawn_connect(&connection);

    assert!(wait_until(|| adapter.emit(LINK_UP.clone())).await);
    assert!(wait_until(|| adapter.commands().contains(&Command::RequestMtu(MTU_CEILING))).await);
    adapter.emit(GattEvent::MtuChanged {
        mtu: 0,
        status: 0x08,
    });

    let failed =
        ConnectionState::Failed(FailureReason::Transport(GattStatus::ConnectionTimeout));
    assert_eq!(attempt.await.unwrap(), Err(Error::ConnectFailed(failed)));
    assert_eq!(connection.state().await, failed);
    assert!(!adapter.commands().contains(&Command::DiscoverAttributes));
    assert_eq!(adapter.commands().last(), Some(&Command::Close));
}

#[tokio::test(start_paused = true)]
async fn test_peripheral_mtu_change_updates_payload() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    let mut changes = connection.state_changes();
    assert_eq!(connection.payload_size().await, MIN_USABLE_PAYLOAD);

    adapter.emit(GattEvent::MtuChanged {
        mtu: 185,
        status: 0x00,
    });

    let mut payload = connection.payload_size().await;
    for _ in 0..100 {
        if payload != MIN_USABLE_PAYLOAD {
            break;
        }
        tokio::time::sleep(DEFAULT_SETTLE_DELAY / 10).await;
        payload = connection.payload_size().await;
    }
    assert_eq!(payload, 178);
    assert_eq!(connection.state().await, ConnectionState::Connected);
    assert!(drain(&mut changes).is_empty());
    assert!(adapter.commands().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_request_stops_dispatch() {
    let (adapter, connection) = connected(ConnectionConfig::default()).await;
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();

    connection
        .submit(Request::read_characteristic(char_id(TX), move |result| {
            let _ = first_tx.send(result);
        }))
        .await
        .unwrap();
    connection
        .submit(Request::read_characteristic(char_id(TX), move |result| {
            let _ = second_tx.send(result);
        }))
        .await
        .unwrap();

    connection.disconnect().await;
    adapter.emit(GattEvent::CharacteristicRead {
        handle: TX_HANDLE,
        status: 0x00,
        value: vec![0x2A],
    });

    assert_eq!(first_rx.await.unwrap(), Ok(vec![0x2A]));
    assert_eq!(second_rx.await.unwrap(), Err(GattStatus::NoConnection));
    assert_eq!(connection.state().await, ConnectionState::DisconnectRequested);
    assert_eq!(
        adapter.commands(),
        vec![Command::ReadCharacteristic(TX_HANDLE), Command::Disconnect]
    );
}
