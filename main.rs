use clap::Parser;
use crossbeam_channel::Select;
use photo_recognizer::format::{format_recognitions, render_event, results_to_json};
use photo_recognizer::source::{is_supported_image, ImageSource};
use photo_recognizer::{
    ClassifierProvider, InferencePipeline, Invocation, ModelBundle, PipelineEvent, Recognition,
    Result, Settings,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "photo-recognizer")]
#[command(about = "Classify photos with a pretrained image model")]
struct Cli {
    /// Photos to classify
    #[arg(value_name = "IMAGE")]
    images: Vec<PathBuf>,

    /// JSON settings file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Model file, overriding the bundled one
    #[arg(long, value_name = "FILE")]
    model: Option<PathBuf>,

    /// Labels file, one label per line
    #[arg(long, value_name = "FILE")]
    labels: Option<PathBuf>,

    /// Abort a single inference after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print results as JSON once every photo is done
    #[arg(long)]
    json: bool,
}

enum Slot {
    Setup,
    Photo(usize),
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<bool> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let mut classifier = ModelBundle::discover().apply(&settings.classifier);
    if let Some(model) = cli.model {
        classifier.model_path = model;
    }
    if let Some(labels) = cli.labels {
        classifier.labels_path = labels;
    }
    if cli.timeout_ms.is_some() {
        settings.pipeline.inference_timeout_ms = cli.timeout_ms;
    }
    settings.pipeline.queue_capacity = settings.pipeline.queue_capacity.max(cli.images.len() + 1);

    let provider = Arc::new(ClassifierProvider::onnx(classifier));
    let pipeline = InferencePipeline::new(provider, &settings.pipeline)?;

    let mut setup = Some(pipeline.initialize());
    let mut decode_failed = false;
    let mut photos: Vec<(String, Invocation)> = Vec::with_capacity(cli.images.len());
    for path in cli.images {
        if !is_supported_image(&path) {
            log::warn!("{} does not look like a supported image", path.display());
        }
        let name = path.display().to_string();
        match ImageSource::Picked(path).decode() {
            Ok(image) => photos.push((name, pipeline.classify(image))),
            Err(err) => {
                println!("[{name}] {err}");
                decode_failed = true;
            }
        }
    }

    let mut ok = !decode_failed;
    let mut results: BTreeMap<String, Vec<Recognition>> = BTreeMap::new();
    loop {
        let mut select = Select::new();
        let mut slots = Vec::new();
        if let Some(invocation) = &setup {
            select.recv(invocation.receiver());
            slots.push(Slot::Setup);
        }
        for (index, (_, invocation)) in photos.iter().enumerate() {
            if !invocation.is_done() {
                select.recv(invocation.receiver());
                slots.push(Slot::Photo(index));
            }
        }
        if slots.is_empty() {
            break;
        }
        let ready = select.ready();
        drop(select);

        match slots[ready] {
            Slot::Setup => {
                if let Some(invocation) = setup.as_mut() {
                    while let Some(event) = invocation.try_next() {
                        match event {
                            PipelineEvent::Status(message) => println!("[model] {message}"),
                            PipelineEvent::Result(()) => {}
                            PipelineEvent::Failure(err) => {
                                println!("[model] {err}");
                                ok = false;
                            }
                        }
                    }
                    if invocation.is_done() {
                        setup = None;
                    }
                }
            }
            Slot::Photo(index) => {
                let (name, invocation) = &mut photos[index];
                while let Some(event) = invocation.try_next() {
                    match event {
                        PipelineEvent::Result(recognitions) if cli.json => {
                            results.insert(name.clone(), recognitions);
                        }
                        PipelineEvent::Result(recognitions) => {
                            println!("[{name}]\n{}", format_recognitions(&recognitions));
                        }
                        other => {
                            if matches!(other, PipelineEvent::Failure(_)) {
                                ok = false;
                            }
                            if !cli.json || matches!(other, PipelineEvent::Failure(_)) {
                                println!("[{name}] {}", render_event(&other));
                            }
                        }
                    }
                }
            }
        }
    }

    if cli.json {
        println!("{}", results_to_json(&results)?);
    }
    Ok(ok)
}
