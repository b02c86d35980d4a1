//! Shared helpers for doppel integration tests.

#![allow(dead_code)]

use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use url::Url;

use doppel::db::{status_repo, Database};

/// Encodes a small gradient PNG in memory.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 7 % 256) as u8,
            (y * 11 % 256) as u8,
            ((x + y) * 13 % 256) as u8,
        ])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageFormat::Png)
        .expect("Failed to encode test PNG");
    buf.into_inner()
}

pub fn test_url(s: &str) -> Url {
    Url::parse(s).expect("Bad test URL")
}

/// Polls the status store until the (source, link) row reaches the
/// wanted status, panicking after the timeout.
pub async fn wait_for_status(
    db: &Database,
    source: &str,
    link: &str,
    wanted: &str,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(row) = status_repo::find(db, source, link).expect("Status query failed") {
            if row.status == wanted {
                return;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("Status for {} never became {}", link, wanted);
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
