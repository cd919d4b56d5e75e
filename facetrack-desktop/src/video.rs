use anyhow::{Context, Error, Result};
use facetrack_img::{FrameSink, FrameSource, StopSignal};
use image::{EncodableLayout, ImageFormat, RgbaImage};
use tracing::{debug, error, info, span, Level};

use std::collections::VecDeque;
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nokhwa::{
    nokhwa_initialize,
    pixel_format::RgbAFormat,
    query,
    utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType},
    Camera,
};

pub struct CameraSource {
    camera: Camera,
}

impl CameraSource {
    /// Opens camera `index`, camera 0 when unset.
    pub fn new(index: Option<u32>, fps: u32) -> Result<CameraSource> {
        nokhwa_initialize(|granted| {
            debug!("User said {}", granted);
        });

        let cameras = query(ApiBackend::Auto)?;
        cameras
            .iter()
            .for_each(|cam| debug!("Found camera: {:?}", cam));

        if cameras.is_empty() {
            return Err(Error::msg("No camera found"));
        }

        let mut camera = Camera::new(
            CameraIndex::Index(index.unwrap_or(0)),
            RequestedFormat::new::<RgbAFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
        )?;
        camera.set_frame_rate(fps)?;
        camera.open_stream()?;

        let resolution = camera.resolution();
        info!(
            "Capturing {}x{} at {}fps",
            resolution.width(),
            resolution.height(),
            camera.frame_rate()
        );
        Ok(CameraSource { camera })
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let frame = self
            .camera
            .frame()
            .context("Failed to pull frame from webcam")?;

        // TODO: Is there a faster camera format/decode solution
        let decode_span = span!(Level::DEBUG, "decode_nokwha_buff");
        let _guard = decode_span.enter();
        Ok(Some(frame.decode_image::<RgbAFormat>()?))
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            error!("Failed to stop camera stream {e:?}");
        }
    }
}

/// Image files read in order: a single file, or every image in a
/// directory sorted by name.
pub struct ImageSequence {
    paths: VecDeque<PathBuf>,
}

impl ImageSequence {
    pub fn new(path: &Path) -> Result<ImageSequence> {
        if !path.is_dir() {
            return Ok(ImageSequence {
                paths: VecDeque::from([path.to_path_buf()]),
            });
        }

        let mut paths = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("Failed to list {}", path.display()))? {
            let p = entry?.path();
            if p.is_file() && ImageFormat::from_path(&p).is_ok() {
                paths.push(p);
            }
        }
        paths.sort();
        info!("Found {} images in {}", paths.len(), path.display());

        Ok(ImageSequence {
            paths: paths.into(),
        })
    }
}

impl FrameSource for ImageSequence {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Some(path) = self.paths.pop_front() else {
            return Ok(None);
        };

        let img = image::open(&path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(img.into_rgba8()))
    }
}

/// Decodes a video file with ffmpeg, reading raw RGBA frames from its
/// stdout. The frame size comes from ffprobe.
pub struct VideoFileSource {
    decoder: Child,
    width: u32,
    height: u32,
}

impl VideoFileSource {
    pub fn new(path: &Path) -> Result<VideoFileSource> {
        let (width, height) = probe_size(path)?;

        let decoder = Command::new("ffmpeg")
            .args(["-loglevel", "error", "-noautorotate", "-i"])
            .arg(path)
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to start ffmpeg")?;
        info!("Decoding {} at {}x{}", path.display(), width, height);

        Ok(VideoFileSource {
            decoder,
            width,
            height,
        })
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<RgbaImage>> {
        let Some(stdout) = self.decoder.stdout.as_mut() else {
            return Ok(None);
        };
        read_frame(stdout, self.width, self.height)
    }
}

impl Drop for VideoFileSource {
    fn drop(&mut self) {
        // Already gone at end of file
        let _ = self.decoder.kill();
        if let Err(e) = self.decoder.wait() {
            error!("Failed to reap decoder process {e:?}");
        }
    }
}

fn probe_size(path: &Path) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .context("Failed to run ffprobe")?;

    if !output.status.success() {
        return Err(Error::msg(format!(
            "ffprobe failed on {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    parse_video_size(&String::from_utf8_lossy(&output.stdout))
}

/// `WIDTHxHEIGHT`, as printed by ffprobe's csv output.
fn parse_video_size(probe: &str) -> Result<(u32, u32)> {
    let line = probe.lines().next().unwrap_or_default().trim();
    let Some((width, height)) = line.split_once('x') else {
        return Err(Error::msg(format!("Unexpected video size {line:?}")));
    };

    let width: u32 = width.parse().with_context(|| format!("Bad video width {width:?}"))?;
    let height: u32 = height.parse().with_context(|| format!("Bad video height {height:?}"))?;
    if width == 0 || height == 0 {
        return Err(Error::msg(format!("Empty video size {line:?}")));
    }
    Ok((width, height))
}

/// One frame, or `None` once the stream ends. A cut-off last frame counts
/// as the end.
fn read_frame(reader: &mut impl Read, width: u32, height: u32) -> Result<Option<RgbaImage>> {
    let mut buf = vec![0u8; width as usize * height as usize * 4];
    match reader.read_exact(&mut buf) {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let frame = RgbaImage::from_raw(width, height, buf)
        .ok_or_else(|| Error::msg("Decoded frame does not match the video size"))?;
    Ok(Some(frame))
}

/// True for directories and files with an image extension, everything
/// else is treated as video.
pub fn is_image_input(path: &Path) -> bool {
    path.is_dir() || ImageFormat::from_path(path).is_ok()
}

/// Pipes raw RGBA frames into ffplay, or into ffmpeg writing a v4l2
/// loopback device. The process starts on the first frame, which fixes the
/// video size. Closing the player window raises `stop`.
pub struct OutputVideoStream {
    device: Option<String>,
    stop: StopSignal,
    output: Option<(Child, u32, u32)>,
}

impl Drop for OutputVideoStream {
    fn drop(&mut self) {
        if let Some((output_proc, _, _)) = self.output.as_mut() {
            if let Err(e) = output_proc.kill() {
                error!("Failed to stop output process {e:?}");
            }
        }
    }
}

impl OutputVideoStream {
    pub fn new(device: Option<String>, stop: StopSignal) -> Self {
        Self {
            device,
            stop,
            output: None,
        }
    }

    fn spawn(&self, width: u32, height: u32) -> Result<Child> {
        let size = format!("{}x{}", width, height);
        let mut command = match &self.device {
            Some(d) => {
                let mut command = Command::new("ffmpeg");
                command.args([
                    "-f",
                    "rawvideo",
                    "-pix_fmt",
                    "rgba",
                    "-s",
                    &size,
                    "-i",
                    "-",
                    "-map",
                    "0:v",
                    "-preset",
                    "fast",
                    "-vf",
                    "format=yuv420p",
                    "-f",
                    "v4l2",
                    &format!("/dev/{d}"),
                ]);
                command
            }
            None => {
                let mut command = Command::new("ffplay");
                command.args([
                    "-f",
                    "rawvideo",
                    "-pixel_format",
                    "rgba",
                    "-video_size",
                    &size,
                    "-fflags",
                    "nobuffer",
                    "-flags",
                    "low_delay",
                    "-",
                ]);
                command
            }
        };

        let output_proc = command
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to start ffplay/ffmpeg")?;
        Ok(output_proc)
    }
}

impl FrameSink for OutputVideoStream {
    fn write_frame(&mut self, img: &RgbaImage) -> Result<()> {
        if self.output.is_none() {
            let output_proc = self.spawn(img.width(), img.height())?;
            self.output = Some((output_proc, img.width(), img.height()));
        }
        let Some((output_proc, width, height)) = self.output.as_mut() else {
            return Ok(());
        };

        if (img.width(), img.height()) != (*width, *height) {
            return Err(Error::msg(format!(
                "Frame is {}x{}, output stream is {}x{}",
                img.width(),
                img.height(),
                width,
                height
            )));
        }

        if let Some(status) = output_proc.try_wait()? {
            info!("Output closed ({status}), stopping");
            self.stop.stop();
            return Ok(());
        }

        if let Some(stdin) = output_proc.stdin.as_mut() {
            match stdin.write_all(img.as_bytes()) {
                Ok(_) => {}
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {
                    info!("Output closed, stopping");
                    self.stop.stop();
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

/// Writes to one image file (the last frame wins), or to numbered PNGs
/// when `path` is a directory or has no extension.
pub struct ImageWriter {
    path: PathBuf,
    numbered: bool,
    written: usize,
}

impl ImageWriter {
    pub fn new(path: PathBuf) -> Result<ImageWriter> {
        let numbered = path.is_dir() || path.extension().is_none();
        if numbered {
            fs::create_dir_all(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
        }

        Ok(ImageWriter {
            path,
            numbered,
            written: 0,
        })
    }

    fn frame_path(&self) -> PathBuf {
        if self.numbered {
            self.path.join(format!("frame_{:05}.png", self.written))
        } else {
            self.path.clone()
        }
    }
}

impl FrameSink for ImageWriter {
    fn write_frame(&mut self, img: &RgbaImage) -> Result<()> {
        let path = self.frame_path();
        img.save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Wrote {}", path.display());
        self.written += 1;
        Ok(())
    }
}
