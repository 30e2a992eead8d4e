#![cfg(unix)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::PathBuf,
    sync::OnceLock,
    time::{Duration, Instant},
};

use eastocr::{
    extract::extract_text, OcrOptions, Preprocessor, RecognitionHints, Recognizer, Region,
    RegionError, Tesseract,
};
use image::{DynamicImage, GrayImage, Luma};

/// Stalls without ever reading the image.
const STALLED: &str = "#!/bin/sh\nsleep 5\n";
/// Reads the image, then stalls on large ones and answers on small ones.
const SLOW_ON_LARGE: &str = "#!/bin/sh\n\
bytes=$(wc -c | tr -d ' ')\n\
if [ \"$bytes\" -gt 20000 ]; then sleep 5; fi\n\
echo word\n";

struct Scripts {
    stalled: PathBuf,
    slow_on_large: PathBuf,
}

// All scripts are written before any test spawns a process, a child forked while one of them is
// still open for writing would make exec fail with ETXTBSY.
fn scripts() -> &'static Scripts {
    static SCRIPTS: OnceLock<Scripts> = OnceLock::new();
    SCRIPTS.get_or_init(|| {
        let dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join("fake_tesseract");
        fs::create_dir_all(&dir).unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.join(name);
            fs::write(&path, body).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path
        };
        Scripts {
            stalled: write("stalled.sh", STALLED),
            slow_on_large: write("slow_on_large.sh", SLOW_ON_LARGE),
        }
    })
}

/// Pseudo-random pixels, so the PNG doesn't compress below the pipe buffer size.
fn noise(width: u32, height: u32) -> GrayImage {
    let mut state = 0x2545_f491_u32;
    GrayImage::from_fn(width, height, |_, _| {
        state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
        Luma([(state >> 24) as u8])
    })
}

fn hints(timeout: Duration) -> RecognitionHints {
    RecognitionHints {
        timeout: Some(timeout),
        ..Default::default()
    }
}

struct Passthrough;

impl Preprocessor for Passthrough {
    fn clean(&self, crop: &DynamicImage) -> Result<GrayImage, RegionError> {
        Ok(crop.to_luma8())
    }
}

#[test]
fn timeout_covers_a_child_that_never_reads_its_input() {
    let _ = env_logger::builder().is_test(true).try_init();
    let tesseract = Tesseract::new(&scripts().stalled);

    let start = Instant::now();
    let result = tesseract.recognize(&noise(600, 600), &hints(Duration::from_millis(200)));
    let elapsed = start.elapsed();

    assert!(
        matches!(result, Err(RegionError::Timeout(timeout)) if timeout == Duration::from_millis(200)),
        "unexpected result {result:?}"
    );
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[test]
fn fast_child_finishes_within_the_timeout() {
    let tesseract = Tesseract::new(&scripts().slow_on_large);

    let text = tesseract
        .recognize(&noise(16, 16), &hints(Duration::from_secs(3)))
        .unwrap();

    assert_eq!(text.trim(), "word");
}

#[test]
fn timed_out_region_is_blank_and_the_others_are_read() {
    let _ = env_logger::builder().is_test(true).try_init();
    let image = DynamicImage::ImageLuma8(noise(400, 400));
    let regions = [
        Region {
            start_x: 0,
            start_y: 0,
            end_x: 20,
            end_y: 20,
        },
        Region {
            start_x: 50,
            start_y: 50,
            end_x: 350,
            end_y: 350,
        },
        Region {
            start_x: 360,
            start_y: 360,
            end_x: 390,
            end_y: 380,
        },
    ];
    let tesseract = Tesseract::new(&scripts().slow_on_large);

    for parallel in [true, false] {
        let options = OcrOptions {
            hints: hints(Duration::from_millis(300)),
            parallel,
        };

        let start = Instant::now();
        let text = extract_text(&image, &regions, &Passthrough, &tesseract, &options);
        let elapsed = start.elapsed();

        assert_eq!(text.lines, ["word", "", "word"], "parallel: {parallel}");
        assert_eq!(text.text(), "word\n\nword");
        assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
    }
}
