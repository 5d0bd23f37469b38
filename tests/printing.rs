//! End-to-end scenarios: a real printer and real peers talking over
//! loopback sockets inside the test process.

use print_arbiter::peer::Peer;
use print_arbiter::printer::Printer;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

async fn start_printer() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let printer = Printer::new();
        let _ = printer.run(listener).await;
    });

    address
}

async fn start_peer(id: i32, printer_address: &str, peer_addresses: Vec<String>) -> (Arc<Peer>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let peer = Arc::new(Peer::new(id, printer_address.to_string(), peer_addresses));
    tokio::spawn(Peer::serve(peer.core.clone(), listener));

    (peer, address)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_solo_peer_prints_without_waiting() {
    let printer_address = start_printer().await;
    let (peer, _) = start_peer(1, &printer_address, Vec::new()).await;

    // no other peers, so acquiring the resource must be immediate
    timeout(Duration::from_millis(100), peer.request_cs())
        .await
        .expect("A solo peer must not wait for permissions.");

    let response = peer
        .print("message 1 from client 1")
        .await
        .expect("The print call should succeed.");
    peer.release_cs().await;

    assert!(response.success);
    // one tick for the request, one for the print stamp
    assert!(response.lamport_timestamp >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_peers_never_print_at_the_same_time() {
    let printer_address = start_printer().await;

    let peer_one_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_one_address = peer_one_listener.local_addr().unwrap().to_string();
    let peer_two_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let peer_two_address = peer_two_listener.local_addr().unwrap().to_string();

    let peer_one = Arc::new(Peer::new(
        1,
        printer_address.clone(),
        vec![peer_two_address.clone()],
    ));
    let peer_two = Arc::new(Peer::new(
        2,
        printer_address.clone(),
        vec![peer_one_address.clone()],
    ));
    tokio::spawn(Peer::serve(peer_one.core.clone(), peer_one_listener));
    tokio::spawn(Peer::serve(peer_two.core.clone(), peer_two_listener));

    let first = {
        let peer = peer_one.clone();
        tokio::spawn(async move {
            peer.request_cs().await;
            let entered = Instant::now();
            peer.print("message 1 from client 1").await.unwrap();
            let left = Instant::now();
            peer.release_cs().await;
            (entered, left)
        })
    };

    let second = {
        let peer = peer_two.clone();
        tokio::spawn(async move {
            // fire while peer 1 is inside its 2-3 s print window
            sleep(Duration::from_millis(100)).await;
            peer.request_cs().await;
            let entered = Instant::now();
            peer.print("message 1 from client 2").await.unwrap();
            let left = Instant::now();
            peer.release_cs().await;
            (entered, left)
        })
    };

    let (one, two) = tokio::join!(first, second);
    let (entered_one, left_one) = one.unwrap();
    let (entered_two, left_two) = two.unwrap();

    // peer 1 requested first, so its whole critical section comes first
    assert!(
        left_one <= entered_two,
        "The critical sections overlapped: peer 1 left at {:?}, peer 2 entered at {:?}.",
        left_one,
        entered_two
    );
    assert!(entered_one < left_one);
    assert!(entered_two < left_two);

    // both deferred queues drained once everyone released
    assert_eq!(peer_one.core.deferred_count().await, 0);
    assert_eq!(peer_two.core.deferred_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_dead_peer_does_not_block_the_others() {
    let printer_address = start_printer().await;

    // bind and drop to get an address nothing is listening on
    let dead_address = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let (peer, _) = start_peer(1, &printer_address, vec![dead_address]).await;

    // the cycle waits at most the transport deadline for the dead peer,
    // then prints anyway
    timeout(Duration::from_secs(10), peer.print_cycle())
        .await
        .expect("An unreachable peer must not block the cycle.");
}
