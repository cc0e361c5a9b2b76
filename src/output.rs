//! Channel output as PNG files
//!
//! The renderer polls channels in-process; this module covers the two ways
//! channels leave the process: a PNG body for the HTTP snapshot endpoint and
//! a directory of `<face>.png` files for one-shot runs.

use anyhow::{Context, Result};
use image::{ImageFormat, ImageOutputFormat, RgbaImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::faces::FaceId;
use crate::segmenter::ChannelStore;

/// Encode an RGBA raster as PNG
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>> {
    let mut png_data = Vec::new();
    let mut cursor = Cursor::new(&mut png_data);
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .context("Failed to encode PNG")?;
    Ok(png_data)
}

/// File name a face's channel is written under
pub fn channel_file_name(face: FaceId) -> String {
    format!("{}.png", face.as_str())
}

/// Write the current channel of each face to `dir/<face>.png`
pub fn write_channels(dir: &Path, store: &ChannelStore, faces: &[FaceId]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let mut written = Vec::with_capacity(faces.len());
    for &face in faces {
        let path = dir.join(channel_file_name(face));
        let channel = store.get(face);
        channel
            .save_with_format(&path, ImageFormat::Png)
            .with_context(|| format!("Failed to write channel {} to {:?}", face, path))?;
        debug!("Wrote {} ({}x{})", path.display(), channel.width(), channel.height());
        written.push(path);
    }

    info!("Wrote {} channels to {:?}", written.len(), dir);
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_png_signature() {
        let img = RgbaImage::from_pixel(4, 3, Rgba([1, 2, 3, 4]));
        let png = encode_png(&img).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");

        let decoded = image::load_from_memory(&png).unwrap().into_rgba8();
        assert_eq!(decoded, img);
    }

    #[test]
    fn test_write_channels() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("channels");
        let store = ChannelStore::new(8, 8).unwrap();

        let written = write_channels(&out, &store, &[FaceId::Front, FaceId::Floor]).unwrap();
        assert_eq!(written, vec![out.join("front.png"), out.join("floor.png")]);

        let front = image::open(&written[0]).unwrap().into_rgba8();
        assert_eq!(front.dimensions(), (8, 8));
        assert!(front.pixels().all(|p| p.0 == [0, 0, 0, 0]));
        assert!(!out.join("back.png").exists());
    }
}
