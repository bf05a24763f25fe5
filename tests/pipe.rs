// SPDX-License-Identifier: MPL-2.0

//! End-to-end pipe scenarios driven through the [`kipc::kernel::Kernel`]
//! facade rather than the bare `pipe` module.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kipc::kernel::{Kernel, KernelConfig};

/// Enables `log`/`trace!`/`debug!`/`warn!` output for tests run with
/// `RUST_LOG` set; a no-op once another test in the same process has
/// already initialized the global logger.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn write_then_read_within_one_process() {
    init_logging();
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let (r, w) = kernel.pipe().unwrap();
    assert_eq!(kernel.write(w, b"hello").unwrap(), 5);

    let mut buf = [0u8; 5];
    assert_eq!(kernel.read(r, &mut buf).unwrap(), 5);
    assert_eq!(&buf, b"hello");

    kernel.close(r).unwrap();
    kernel.close(w).unwrap();
}

#[test]
fn reader_blocks_until_a_sibling_thread_writes() {
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let (r, w) = kernel.pipe().unwrap();

    let writer_kernel = kernel.clone();
    let writer_tid = kernel
        .create_thread(move || {
            thread::sleep(Duration::from_millis(30));
            writer_kernel.write(w, b"sibling").unwrap();
            writer_kernel.close(w).unwrap();
            0
        })
        .unwrap();

    let mut buf = [0u8; 7];
    let n = kernel.read(r, &mut buf).unwrap();
    assert_eq!(n, 7);
    assert_eq!(&buf, b"sibling");

    kernel.thread_join(writer_tid).unwrap();
    kernel.close(r).unwrap();
}

#[test]
fn writer_close_delivers_eof_to_reader() {
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let (r, w) = kernel.pipe().unwrap();
    kernel.write(w, b"x").unwrap();
    kernel.close(w).unwrap();

    let mut buf = [0u8; 8];
    let n = kernel.read(r, &mut buf).unwrap();
    assert_eq!(n, 1);
    let n = kernel.read(r, &mut buf).unwrap();
    assert_eq!(n, 0, "EOF once the writer is gone and the buffer is drained");
}

#[test]
fn write_to_a_pipe_with_no_reader_fails() {
    let kernel = Arc::new(Kernel::new(KernelConfig::default()));
    kernel.spawn_init();

    let (r, w) = kernel.pipe().unwrap();
    kernel.close(r).unwrap();
    assert!(kernel.write(w, b"x").is_err());
}
