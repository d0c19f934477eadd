use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use log::{debug, info};
use opencv::{self as cv, prelude::*};

use crate::slot::FrameSlot;

pub const FRAME_WIDTH: i32 = 224;
pub const FRAME_HEIGHT: i32 = 224;
pub const FRAME_CHANNELS: i32 = 3;
pub const FRAME_LEN: usize = (FRAME_WIDTH * FRAME_HEIGHT * FRAME_CHANNELS) as usize;

pub const DISPLAY_WIDTH: i32 = 448;
pub const DISPLAY_HEIGHT: i32 = 448;

pub const WINDOW_NAME: &str = "image";
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KEY_WAIT_MS: i32 = 30;
const KEY_ESC: i32 = 27;

/// Where rendered frames go. `Window` in the binary, a recorder in tests.
pub trait FrameSink {
    fn show(&mut self, image: &cv::core::Mat) -> anyhow::Result<()>;
    /// Waits up to `delay_ms` for a key press, -1 when none arrives.
    fn wait_key(&mut self, delay_ms: i32) -> anyhow::Result<i32>;
}

pub struct Window {
    name: String,
}

impl Window {
    pub fn open(name: &str, x: i32, y: i32) -> anyhow::Result<Self> {
        cv::highgui::named_window(name, cv::highgui::WINDOW_NORMAL)?;
        cv::highgui::move_window(name, x, y)?;
        Ok(Window { name: name.to_owned() })
    }

    pub fn close(self) -> anyhow::Result<()> {
        cv::highgui::destroy_all_windows()?;
        Ok(())
    }
}

impl FrameSink for Window {
    fn show(&mut self, image: &cv::core::Mat) -> anyhow::Result<()> {
        cv::highgui::imshow(&self.name, image)?;
        Ok(())
    }

    fn wait_key(&mut self, delay_ms: i32) -> anyhow::Result<i32> {
        Ok(cv::highgui::wait_key(delay_ms)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Idle,
    Rendered,
    Closed,
}

/// Reshapes a flat 224x224x3 buffer and scales it up for display.
pub fn prepare_frame(frame: &[u8]) -> anyhow::Result<cv::core::Mat> {
    anyhow::ensure!(
        frame.len() == FRAME_LEN,
        "cannot reshape {} bytes into {}x{}x{}",
        frame.len(),
        FRAME_HEIGHT,
        FRAME_WIDTH,
        FRAME_CHANNELS
    );

    let mut image = cv::core::Mat::new_rows_cols_with_default(
        FRAME_HEIGHT,
        FRAME_WIDTH,
        cv::core::CV_8UC3,
        cv::core::Scalar::all(0.),
    )?;
    image.data_bytes_mut()?.copy_from_slice(frame);

    let mut resized = cv::core::Mat::default();
    cv::imgproc::resize(
        &image,
        &mut resized,
        cv::core::Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT),
        0.,
        0.,
        cv::imgproc::INTER_LINEAR,
    )?;

    Ok(resized)
}

/// One pass of the render loop: draw the pending frame if there is one,
/// then give the window a chance to report a key press.
pub fn tick<S: FrameSink>(slot: &FrameSlot, sink: &mut S) -> anyhow::Result<Tick> {
    let mut state = Tick::Idle;

    if let Some(frame) = slot.take() {
        let image = prepare_frame(&frame)?;
        sink.show(&image)?;
        state = Tick::Rendered;
    }

    let key = sink.wait_key(KEY_WAIT_MS)?;
    if key & 0xFF == KEY_ESC {
        debug!("escape pressed");
        return Ok(Tick::Closed);
    }

    Ok(state)
}

/// Runs until escape is pressed or `running` is cleared.
pub fn run<S: FrameSink>(
    slot: &FrameSlot,
    sink: &mut S,
    running: &AtomicBool,
    poll: Duration,
) -> anyhow::Result<()> {
    while running.load(Ordering::Relaxed) {
        if tick(slot, sink)? == Tick::Closed {
            info!("Window closed");
            return Ok(());
        }
        thread::sleep(poll);
    }
    info!("Interrupted");
    Ok(())
}
