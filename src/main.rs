use std::{path::PathBuf, process::ExitCode, time::Duration, time::Instant};

use clap::Parser;
use eastocr::{open_image, EastOcrBuilder, OcrOptions, PageSegMode, RecognitionHints};
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "eastocr", about = "Find text regions in an image and read them")]
struct Cli {
    /// Image to read
    image: PathBuf,

    /// EAST detector exported to ONNX
    #[arg(long, default_value = "models/frozen_east_text_detection.onnx")]
    model: PathBuf,

    /// Lower finds more boxes, higher keeps only the certain ones
    #[arg(long, default_value_t = 0.7)]
    min_confidence: f32,

    /// Directory for the annotated image and the extracted text
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Longest side of the detector input
    #[arg(long, default_value_t = 1280)]
    max_side_len: u32,

    /// Tesseract page segmentation mode
    #[arg(long, default_value_t = 7, value_parser = parse_psm)]
    psm: u8,

    /// Tesseract language
    #[arg(long)]
    lang: Option<String>,

    /// Tesseract executable
    #[arg(long, default_value = "tesseract")]
    tesseract: PathBuf,

    /// CRNN recognizer model, used instead of tesseract (requires --rec-keys)
    #[arg(long, requires = "rec_keys")]
    rec_model: Option<PathBuf>,

    /// Character list of the CRNN recognizer
    #[arg(long, requires = "rec_model")]
    rec_keys: Option<PathBuf>,

    /// Give up on a single region after this many milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Read regions one at a time
    #[arg(long)]
    sequential: bool,

    /// Skip detection and read the whole image
    #[arg(long)]
    whole: bool,
}

fn parse_psm(value: &str) -> Result<u8, String> {
    let psm = value.parse::<u8>().map_err(|err| err.to_string())?;
    PageSegMode::from_psm(psm)
        .map(|_| psm)
        .ok_or_else(|| format!("unsupported page segmentation mode {psm}"))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> eastocr::Result<()> {
    let image = open_image(&cli.image)?;

    let mut builder = EastOcrBuilder::new()
        .det_model(&cli.model)
        .max_side_len(cli.max_side_len)
        .tesseract(&cli.tesseract);
    if let Some(lang) = &cli.lang {
        builder = builder.language(lang);
    }
    if let (Some(model), Some(keys)) = (&cli.rec_model, &cli.rec_keys) {
        builder = builder.rec_model(model, keys);
    }
    let ocr = builder.build()?;

    let options = OcrOptions {
        hints: RecognitionHints {
            page_seg_mode: PageSegMode::from_psm(cli.psm).unwrap_or_default(),
            timeout: cli.timeout_ms.map(Duration::from_millis),
            ..Default::default()
        },
        parallel: !cli.sequential,
    };

    let stem = cli
        .image
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    std::fs::create_dir_all(&cli.output_dir)?;

    if cli.whole {
        let hints = RecognitionHints {
            page_seg_mode: PageSegMode::Auto,
            ..options.hints
        };
        let text = ocr.recognize_whole(&image, &hints).unwrap_or_else(|err| {
            log::warn!("Whole-image recognition failed: {err}");
            String::new()
        });
        println!("{text}");
        return write_text(&cli.output_dir.join(format!("extracted_{stem}.txt")), &text);
    }

    let start = Instant::now();
    let output = ocr.read(&image, cli.min_confidence, &options)?;
    log::debug!("{:?}", start.elapsed());

    let annotated_path = cli.output_dir.join(format!("detected_regions_{stem}.png"));
    output.detection.annotated.save(&annotated_path)?;
    println!(
        "Detected {} text regions, annotated image saved to {}",
        output.detection.regions.len(),
        annotated_path.display()
    );

    for (index, region) in output.detection.regions.iter().enumerate() {
        println!(
            "Region {}: ({}, {}, {}, {}) {:?}",
            index + 1,
            region.start_x,
            region.start_y,
            region.end_x,
            region.end_y,
            output.text.lines[index]
        );
    }

    let text = output.text.text();
    if text.is_empty() {
        println!("No readable text found in the image.");
        return Ok(());
    }
    write_text(&cli.output_dir.join(format!("extracted_{stem}.txt")), &text)
}

fn write_text(path: &std::path::Path, text: &str) -> eastocr::Result<()> {
    std::fs::write(path, text)?;
    println!("Extracted text saved to {}", path.display());
    Ok(())
}
