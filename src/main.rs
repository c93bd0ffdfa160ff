use anyhow::Result;
use clap::Parser;
use std::path::Path;

use indicatif::ProgressStyle;
use tracing::{info, info_span, warn, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use mesh_tracker::config::*;
use mesh_tracker::pipeline::FramePipeline;
use mesh_tracker::video::VideoInput;
use mesh_tracker::visualization::{NullSink, RenderSink, RerunSink};

#[derive(Parser)]
pub struct Args {
    #[clap(short, long, default_value = "./data/video.mp4")]
    pub input: String,
    /// JSON file replacing the tuning flags below
    #[clap(long)]
    pub config_file: Option<String>,
    /// Do not write a rerun recording
    #[clap(long)]
    pub no_recording: bool,
    #[clap(flatten)]
    pub config: Config,
}

fn main() -> Result<()> {
    // parse the config
    let args = Args::parse();
    let config = match &args.config_file {
        Some(path) => Config::from_json_file(Path::new(path))?,
        None => args.config,
    };

    // setup logging
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stdout_writer()))
        .with(indicatif_layer)
        .with(LevelFilter::INFO)
        .init();

    // open the video
    let mut video = VideoInput::new(Path::new(&args.input))?;

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(video.frame_count().unwrap_or(0));
    let header_span_enter = header_span.enter();

    let sink: Box<dyn RenderSink> = if args.no_recording {
        Box::new(NullSink)
    } else {
        Box::new(RerunSink::new(&config.recording)?)
    };
    let mut pipeline = FramePipeline::new(config, sink)?;

    let mut skipped = 0;
    while let Some(frame) = video.read()? {
        Span::current().pb_inc(1);

        match pipeline.process_frame(&frame) {
            Ok(report) => report.log(),
            // preprocessing or matching failed, the registry is untouched
            Err(err) => {
                skipped += 1;
                warn!("skipping frame: {:#}", err);
            }
        }
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    info!(
        "processed {} frames ({} skipped), {} meshes tracked",
        pipeline.frame_index(),
        skipped,
        pipeline.registry().len()
    );

    Ok(())
}
