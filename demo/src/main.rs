// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host demo: boots the kernel on a fake board driven by real wall-clock
//! time, runs a few cooperative tasks for a while, and dumps the resulting
//! task table as JSON.
//!
//! The producer logs a line to storage and mails the consumer every pass;
//! the consumer drains its ring and prints what it got; the blinker toggles
//! a pin and sleeps, so the scheduler's sleep/wake path gets exercise too.

use std::time::Instant;

use abi::TaskStatus;
use fake_board::{FakeGpio, FakeI2c, FakeSpi, RamDisk};
use kern::{Kernel, Platform, TaskContext};

/// Task ids by creation order; the consumer is created first so the
/// producer can address it.
const CONSUMER: usize = 1;

struct DemoBoard {
    origin: Instant,
    disk: Option<RamDisk>,
    gpio: FakeGpio,
    i2c: FakeI2c,
    spi: FakeSpi,
}

impl DemoBoard {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            disk: Some(RamDisk::new()),
            gpio: FakeGpio::default(),
            i2c: FakeI2c::default(),
            spi: FakeSpi::default(),
        }
    }
}

impl Platform for DemoBoard {
    type Fs = RamDisk;
    type Gpio = FakeGpio;
    type I2c = FakeI2c;
    type Spi = FakeSpi;

    fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }

    fn console_line(&mut self, line: std::fmt::Arguments<'_>) {
        println!("{line}");
    }

    fn filesystem(&mut self) -> Option<&mut RamDisk> {
        self.disk.as_mut()
    }

    fn gpio(&mut self) -> &mut FakeGpio {
        &mut self.gpio
    }

    fn i2c(&mut self) -> &mut FakeI2c {
        &mut self.i2c
    }

    fn spi(&mut self) -> &mut FakeSpi {
        &mut self.spi
    }

    fn halt(&mut self) -> ! {
        eprintln!("board halted");
        std::process::exit(1);
    }
}

fn consumer(ctx: &mut dyn TaskContext) {
    let mut buf = [0; abi::MAX_MESSAGE_DATA];
    match ctx.receive(&mut buf) {
        Ok((len, from)) => {
            let text = String::from_utf8_lossy(&buf[..len]).into_owned();
            ctx.print(&format!("got {:?} from task {}", text, from));
        }
        Err(_) => ctx.yield_now(),
    }
}

fn producer(ctx: &mut dyn TaskContext) {
    let fd = ctx
        .file_open("/journal.txt", true)
        .expect("demo disk is always present");
    ctx.file_write(fd, b"pass\n").expect("journal is writable");
    ctx.file_close(fd).expect("journal closes");

    // A full ring just means the consumer is behind; drop the tick.
    let _ = ctx.send(CONSUMER, b"tick");
    ctx.sleep(20);
}

fn blinker(ctx: &mut dyn TaskContext) {
    let lit = ctx.digital_read(13).unwrap_or(false);
    ctx.digital_write(13, !lit)
        .expect("blinker has GPIO by default");
    ctx.sleep(50);
}

fn main() {
    let mut heap = vec![0; 4096];
    let mut kernel = Kernel::new(DemoBoard::new(), &mut heap);

    let consumer_id = kernel
        .create_task("consumer", consumer)
        .expect("task table has room");
    assert_eq!(consumer_id, CONSUMER);
    kernel
        .create_task("producer", producer)
        .expect("task table has room");
    kernel
        .create_task("blinker", blinker)
        .expect("task table has room");

    let start = Instant::now();
    while start.elapsed().as_millis() < 250 {
        kernel.schedule();
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    kernel.print_task_list();
    kernel.print_memory_info();

    let journal = kernel
        .platform()
        .disk
        .as_ref()
        .and_then(|d| d.contents("/journal.txt"))
        .unwrap_or_default();
    println!("journal recorded {} passes", journal.len() / 5);

    let statuses: Vec<TaskStatus> = kernel.task_statuses().collect();
    let json = serde_json::to_string_pretty(&statuses)
        .expect("statuses serialize cleanly");
    println!("{json}");
}
