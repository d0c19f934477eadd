use std::{
    fs,
    io::{BufRead, Write},
    path::Path,
};

use anyhow::Context;
use log::{debug, info};
use opencv::{self as cv, prelude::*};
use serde::Serialize;

use crate::net::mqtt::Publish;

#[derive(Serialize)]
struct FramePayload<'a> {
    frame: &'a [u8],
}

/// Publishes every file in `dir`, one operator confirmation per image.
///
/// Files are visited in whatever order the filesystem lists them. The first
/// failure (unreadable image, closed input, broker error) ends the run.
pub fn publish_images<P, R, W>(
    dir: &Path,
    topic: &str,
    publisher: &mut P,
    input: &mut R,
    prompt: &mut W,
) -> anyhow::Result<usize>
where
    P: Publish,
    R: BufRead,
    W: Write,
{
    let mut published = 0;

    for entry in fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();

        let image = load_image(&entry.path())?;
        // not sent; kept to match the filter's jpeg input mode
        let jpeg = encode_jpeg(&image)?;
        debug!(
            "{}: {}x{}, {} bytes as jpeg",
            name,
            image.cols(),
            image.rows(),
            jpeg.len()
        );
        let payload = frame_payload(&image)?;

        writeln!(prompt, "Press any key to send image {} ...", name)?;
        prompt.flush()?;
        confirm(input)?;

        publisher.publish(topic, payload)?;
        info!("Sent {} to {}", name, topic);
        published += 1;
    }

    Ok(published)
}

pub fn load_image(path: &Path) -> anyhow::Result<cv::core::Mat> {
    let image = cv::imgcodecs::imread(&path.to_string_lossy(), cv::imgcodecs::IMREAD_COLOR)?;
    anyhow::ensure!(
        image.rows() > 0 && image.cols() > 0,
        "cannot decode image {}",
        path.display()
    );
    Ok(image)
}

fn encode_jpeg(image: &cv::core::Mat) -> anyhow::Result<Vec<u8>> {
    let mut buf = cv::core::Vector::<u8>::new();
    cv::imgcodecs::imencode(".jpg", image, &mut buf, &cv::core::Vector::new())?;
    Ok(buf.to_vec())
}

/// `{"frame": [..]}` with the pixels in row-major BGR order.
pub fn frame_payload(image: &cv::core::Mat) -> anyhow::Result<Vec<u8>> {
    let image = if image.is_continuous() {
        image.try_clone()?
    } else {
        let mut packed = cv::core::Mat::default();
        image.copy_to(&mut packed)?;
        packed
    };
    let frame = image.data_bytes()?;
    Ok(serde_json::to_vec(&FramePayload { frame })?)
}

fn confirm<R: BufRead>(input: &mut R) -> anyhow::Result<()> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        anyhow::bail!("input closed before the image was confirmed");
    }
    Ok(())
}
