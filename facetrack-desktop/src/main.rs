#![warn(unused_extern_crates)]
use anyhow::Result;
use clap::{Args, Parser};
use facetrack_img::stream::{self, FrameSink, FrameSource, RunOptions, StopSignal, ThreadedSource};
use facetrack_img::{Pipeline, PipelineConfig, TrackingMode};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;
use video::{CameraSource, ImageSequence, ImageWriter, OutputVideoStream, VideoFileSource};

mod video;

// Frames allowed to queue between the capture thread and processing
const CAPTURE_QUEUE: usize = 2;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct CmdArgs {
    /// Warn when processing a frame takes longer than this (ms)
    #[arg(short = 'l', long)]
    max_frame_lag_ms: Option<u32>,

    /// Target frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Face detector ONNX model
    #[arg(
        long,
        value_name = "FILE",
        default_value = "models/mediapipe_face_detection_short_range.onnx"
    )]
    detector_model: PathBuf,

    /// Landmark regression model
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "data/rcr/face_landmarks_model.bin"
    )]
    model: PathBuf,

    /// Video file, image file or directory of images to read instead of the camera
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Camera index
    #[arg(long, conflicts_with = "input")]
    camera: Option<u32>,

    #[command(flatten)]
    out: Out,

    /// Run the face detector on every frame instead of tracking landmarks
    #[arg(long)]
    detect_every_frame: bool,

    /// Lowest face detector score to accept
    #[arg(long, default_value = "0.5")]
    min_confidence: f32,

    /// Smallest face (px) the detector reports
    #[arg(long, default_value = "50")]
    min_face_size: u32,

    /// Drop the track once the landmarks span less than this (px)
    #[arg(long, default_value = "20")]
    min_track_size: f32,

    /// Drop the track once less than this fraction of the face is in frame
    #[arg(long, default_value = "0.5")]
    min_visible_fraction: f32,

    /// Largest frame-to-frame change of the tracked face area
    #[arg(long, default_value = "1.5")]
    max_scale_change: f32,

    /// Re-run face detection after this many tracked frames
    #[arg(long)]
    reanchor_frames: Option<u32>,

    /// Detector inference threads, all cores if unset
    #[arg(long)]
    threads: Option<usize>,

    /// Capture frames on a separate thread
    #[arg(long)]
    threaded_capture: bool,
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct Out {
    /// Loopback device to write to. Displays in window if unset
    #[arg(group = "dest", short, long)]
    device: Option<String>,

    /// Image file, or directory for numbered frames, to write to
    #[arg(group = "dest", short, long)]
    output: Option<PathBuf>,
}

impl CmdArgs {
    fn pipeline_config(&self) -> PipelineConfig {
        let mut config = PipelineConfig {
            detector_model: self.detector_model.clone(),
            landmark_model: self.model.clone(),
            threads: self.threads.unwrap_or_else(num_cpus::get),
            ..Default::default()
        };
        config.detector.min_confidence = self.min_confidence;
        config.detector.min_face_size = self.min_face_size;
        config.tracking.min_face_size = self.min_track_size;
        config.tracking.min_visible_fraction = self.min_visible_fraction;
        config.tracking.max_scale_change = self.max_scale_change;
        config.tracking.reanchor_frames = self.reanchor_frames;
        if self.detect_every_frame {
            config.tracking.mode = TrackingMode::DetectEveryFrame;
        }
        config
    }
}

fn main() -> Result<()> {
    let filter = EnvFilter::from_default_env();
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_env_filter(filter)
        .init();

    let args = CmdArgs::parse();

    let config = args.pipeline_config();
    info!("{:?}", config);
    let mut pipeline = Pipeline::from_config(&config)?;

    let stop = StopSignal::new();
    let mut source = open_source(&args)?;
    let mut sink: Box<dyn FrameSink> = match args.out.output {
        Some(output) => Box::new(ImageWriter::new(output)?),
        None => Box::new(OutputVideoStream::new(args.out.device, stop.clone())),
    };

    let options = RunOptions {
        max_frame_lag: args
            .max_frame_lag_ms
            .map(|ms| Duration::from_millis(ms.into())),
    };
    let summary = stream::run(&mut pipeline, source.as_mut(), sink.as_mut(), &stop, &options)?;
    info!(
        "Processed {} frames: {} detections, {} tracked, {} lost, {} without a face",
        summary.frames, summary.detections, summary.tracked, summary.lost, summary.empty
    );

    Ok(())
}

fn open_source(args: &CmdArgs) -> Result<Box<dyn FrameSource>> {
    let input = args.input.clone();
    let camera = args.camera;
    let fps = args.fps;
    let open = move || -> Result<Box<dyn FrameSource>> {
        let source: Box<dyn FrameSource> = match input {
            Some(path) if video::is_image_input(&path) => Box::new(ImageSequence::new(&path)?),
            Some(path) => Box::new(VideoFileSource::new(&path)?),
            None => Box::new(CameraSource::new(camera, fps)?),
        };
        Ok(source)
    };

    if args.threaded_capture {
        Ok(Box::new(ThreadedSource::spawn(open, CAPTURE_QUEUE)?))
    } else {
        open()
    }
}
