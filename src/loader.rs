//! Decoded image data and the background asset loader.
//!
//! Fetching and decoding happen off the frame loop. [`AssetLoader`] runs a
//! worker thread that reads files, decodes them with the `image` crate and
//! reports a [`LoadEvent`] per request. The scene drains those events at the
//! start of a tick (see [`Scene::poll_loader`](crate::Scene::poll_loader)), so
//! registry state only ever changes at a frame boundary.
//!
//! ```ignore
//! let loader = AssetLoader::new()?;
//! loader.load("img/1.jpg", "assets/img/1.jpg");
//! loader.load("img/2.jpg", "assets/img/2.jpg");
//!
//! // every frame
//! scene.poll_loader(&loader);
//! scene.tick();
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use crate::error::{DrapeError, Result};

/// RGBA8 pixels plus their dimensions.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

impl std::fmt::Debug for ImageData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageData")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

impl ImageData {
    /// A single-colour image. Handy for placeholders and tests.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = rgba
            .iter()
            .copied()
            .cycle()
            .take((width * height * 4) as usize)
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decode any format the `image` crate understands.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let rgba = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = rgba.dimensions();
        Ok(Self {
            width,
            height,
            pixels: rgba.into_raw(),
        })
    }

    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let bytes = fs::read(path.into())?;
        Self::decode(&bytes)
    }
}

/// Completion report for one source.
#[derive(Debug)]
pub enum LoadEvent {
    Loaded { source: String, image: ImageData },
    Failed { source: String, reason: String },
}

impl LoadEvent {
    pub fn source(&self) -> &str {
        match self {
            LoadEvent::Loaded { source, .. } | LoadEvent::Failed { source, .. } => source,
        }
    }
}

enum LoadJob {
    File { source: String, path: PathBuf },
    Bytes { source: String, bytes: Vec<u8> },
}

impl LoadJob {
    fn run(self) -> LoadEvent {
        let (source, decoded) = match self {
            LoadJob::File { source, path } => {
                let decoded = ImageData::open(path);
                (source, decoded)
            }
            LoadJob::Bytes { source, bytes } => {
                let decoded = ImageData::decode(&bytes);
                (source, decoded)
            }
        };
        match decoded {
            Ok(image) => LoadEvent::Loaded { source, image },
            Err(err) => LoadEvent::Failed {
                source,
                reason: err.to_string(),
            },
        }
    }
}

/// Background image loader.
///
/// Requests are served in submission order by a single worker thread. The
/// thread exits when the loader is dropped.
pub struct AssetLoader {
    jobs: mpsc::Sender<LoadJob>,
    events: mpsc::Receiver<LoadEvent>,
    in_flight: usize,
}

impl AssetLoader {
    pub fn new() -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<LoadJob>();
        let (event_tx, event_rx) = mpsc::channel();

        thread::Builder::new()
            .name("drape-loader".into())
            .spawn(move || {
                while let Ok(job) = job_rx.recv() {
                    let event = job.run();
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
                log::debug!("loader worker exiting");
            })?;

        Ok(Self {
            jobs: job_tx,
            events: event_rx,
            in_flight: 0,
        })
    }

    /// Queue a file for decoding under the given source identifier.
    pub fn load(&mut self, source: impl Into<String>, path: impl Into<PathBuf>) {
        self.submit(LoadJob::File {
            source: source.into(),
            path: path.into(),
        });
    }

    /// Queue already fetched bytes for decoding.
    pub fn load_bytes(&mut self, source: impl Into<String>, bytes: Vec<u8>) {
        self.submit(LoadJob::Bytes {
            source: source.into(),
            bytes,
        });
    }

    fn submit(&mut self, job: LoadJob) {
        if self.jobs.send(job).is_err() {
            log::error!("loader worker is gone, request dropped");
            return;
        }
        self.in_flight += 1;
    }

    /// Requests submitted but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Every event completed so far, without blocking.
    pub fn drain(&mut self) -> Vec<LoadEvent> {
        let events: Vec<LoadEvent> = self.events.try_iter().collect();
        self.in_flight = self.in_flight.saturating_sub(events.len());
        events
    }

    /// Block until every queued request has completed.
    pub fn wait_all(&mut self) -> Result<Vec<LoadEvent>> {
        let mut events = Vec::with_capacity(self.in_flight);
        while self.in_flight > 0 {
            let event = self
                .events
                .recv()
                .map_err(|_| DrapeError::unavailable("loader", "worker thread stopped"))?;
            self.in_flight -= 1;
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([10, 20, 30, 255]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn solid_fills_every_pixel() {
        let img = ImageData::solid(3, 2, [1, 2, 3, 4]);
        assert_eq!(img.pixels.len(), 24);
        assert_eq!(&img.pixels[20..24], &[1, 2, 3, 4]);
    }

    #[test]
    fn decode_png() {
        let img = ImageData::decode(&png_bytes(4, 3)).unwrap();
        assert_eq!((img.width, img.height), (4, 3));
        assert_eq!(&img.pixels[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn loader_reports_success_and_failure() {
        let mut loader = AssetLoader::new().unwrap();
        loader.load_bytes("good.png", png_bytes(2, 2));
        loader.load_bytes("bad.png", vec![0, 1, 2, 3]);
        loader.load("missing.png", "/definitely/not/here.png");

        let events = loader.wait_all().unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], LoadEvent::Loaded { source, .. } if source == "good.png"));
        assert!(matches!(&events[1], LoadEvent::Failed { source, .. } if source == "bad.png"));
        assert_eq!(events[2].source(), "missing.png");
        assert_eq!(loader.in_flight(), 0);
    }
}
