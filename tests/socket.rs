// SPDX-License-Identifier: MPL-2.0

//! End-to-end stream-socket scenarios driven through the
//! [`kipc::kernel::Kernel`] facade: listen/accept/connect across sibling
//! threads of one process, and the timeout/FIFO edge cases.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use kipc::kernel::{Kernel, KernelConfig};
use kipc::socket::ShutdownMode;

#[test]
fn echo_across_sibling_threads() {
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let listener = kernel.socket(100).unwrap();
    kernel.listen(listener).unwrap();

    let client_kernel = kernel.clone();
    let client_thread = kernel
        .create_thread(move || {
            let client = client_kernel.socket(100).unwrap();
            client_kernel.connect(client, 100, None).unwrap();
            client_kernel.write(client, b"ping").unwrap();
            let mut buf = [0u8; 4];
            assert_eq!(client_kernel.read(client, &mut buf).unwrap(), 4);
            assert_eq!(&buf, b"pong");
            0
        })
        .unwrap();

    let accepted = kernel.accept(listener).unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(kernel.read(accepted, &mut buf).unwrap(), 4);
    assert_eq!(&buf, b"ping");
    kernel.write(accepted, b"pong").unwrap();

    kernel.thread_join(client_thread).unwrap();
}

#[test]
fn connect_with_no_listener_times_out_promptly() {
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let client = kernel.socket(200).unwrap();
    let start = Instant::now();
    let err = kernel.connect(client, 200, Some(Duration::from_millis(50)));
    assert!(err.is_err());
    assert!(start.elapsed() >= Duration::from_millis(45));
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[test]
fn shutdown_write_lets_peer_observe_eof() {
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let listener = kernel.socket(300).unwrap();
    kernel.listen(listener).unwrap();

    let client_kernel = kernel.clone();
    let client_thread = kernel
        .create_thread(move || {
            let client = client_kernel.socket(300).unwrap();
            client_kernel.connect(client, 300, None).unwrap();
            client_kernel.shutdown(client, ShutdownMode::Write).unwrap();
            0
        })
        .unwrap();

    let accepted = kernel.accept(listener).unwrap();
    let mut buf = [0u8; 1];
    let n = kernel.read(accepted, &mut buf).unwrap();
    assert_eq!(n, 0, "peer half-closed its write side");

    kernel.thread_join(client_thread).unwrap();
}
