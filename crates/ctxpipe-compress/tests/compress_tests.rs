use std::sync::{Arc, Mutex};
use std::time::Duration;

use ctxpipe_compress::{AdaptiveCompressor, SalienceModel};
use ctxpipe_core::config::CompressionSettings;
use ctxpipe_core::{CompressionModel, Error, ModelCompression};

fn force() -> Vec<String> {
    vec!["\n".into(), ".".into(), "!".into(), "?".into()]
}

fn passage(sentences: usize) -> String {
    (0..sentences)
        .map(|i| {
            format!(
                "The pump station {i} reported pressure readings within the expected \
                 operating range for the evening shift."
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Records each window and its force tokens, and keeps the first half of its words.
#[derive(Default)]
struct Recorder {
    calls: Mutex<Vec<String>>,
    forced: Mutex<Vec<Vec<String>>>,
}

impl CompressionModel for Recorder {
    fn model_id(&self) -> &str {
        "recorder"
    }
    fn compress(
        &self,
        text: &str,
        _rate: f32,
        force: &[String],
    ) -> anyhow::Result<ModelCompression> {
        self.calls.lock().unwrap().push(text.to_string());
        self.forced.lock().unwrap().push(force.to_vec());
        let words: Vec<&str> = text.split_whitespace().collect();
        let kept = words[..words.len() / 2].join(" ");
        Ok(ModelCompression {
            compressed_text: kept,
            origin_tokens: words.len(),
            compressed_tokens: words.len() / 2,
        })
    }
}

struct Sleeper;

impl CompressionModel for Sleeper {
    fn model_id(&self) -> &str {
        "sleeper"
    }
    fn compress(
        &self,
        text: &str,
        _rate: f32,
        _force: &[String],
    ) -> anyhow::Result<ModelCompression> {
        std::thread::sleep(Duration::from_millis(400));
        Ok(ModelCompression {
            compressed_text: text.to_string(),
            origin_tokens: 1,
            compressed_tokens: 1,
        })
    }
}

#[test]
fn short_input_is_one_call() {
    let recorder = Arc::new(Recorder::default());
    let c = AdaptiveCompressor::new(recorder.clone(), 1500, force());
    let out = c.compress("alpha beta gamma delta", 0.5).unwrap();
    assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    assert_eq!(out.compressed_text, "alpha beta");
    assert_eq!((out.origin_tokens, out.compressed_tokens), (4, 2));
    assert!((out.ratio - 0.5).abs() < 1e-6);
}

#[test]
fn long_input_is_windowed_and_summed() {
    let recorder = Arc::new(Recorder::default());
    let c = AdaptiveCompressor::new(recorder.clone(), 100, force());
    let text = passage(6);
    let out = c.compress(&text, 0.5).unwrap();
    let calls = recorder.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), text.chars().count().div_ceil(100));
    assert!(calls.iter().all(|w| w.chars().count() <= 100));
    assert_eq!(calls.concat(), text, "windows cover the input in order");
    let origin: usize = calls.iter().map(|w| w.split_whitespace().count()).sum();
    assert_eq!(out.origin_tokens, origin);
    assert!((out.ratio - out.compressed_tokens as f32 / out.origin_tokens as f32).abs() < 1e-6);
    assert!(!out.compressed_text.contains("  "));
}

#[test]
fn force_tokens_reach_every_window() {
    let recorder = Arc::new(Recorder::default());
    let c = AdaptiveCompressor::new(recorder.clone(), 100, force());
    c.compress(&passage(6), 0.5).unwrap();
    let forced = recorder.forced.lock().unwrap();
    assert!(forced.len() > 1);
    assert!(forced.iter().all(|f| *f == force()));
}

#[test]
fn blank_windows_are_skipped() {
    let recorder = Arc::new(Recorder::default());
    let c = AdaptiveCompressor::new(recorder.clone(), 10, force());
    let text = format!("{}{}", " ".repeat(25), "tail words here");
    c.compress(&text, 0.5).unwrap();
    let calls = recorder.calls.lock().unwrap();
    assert!(calls.iter().all(|w| !w.trim().is_empty()));
}

#[test]
fn nothing_to_count_has_unit_ratio() {
    let c = AdaptiveCompressor::new(Arc::new(SalienceModel::new()), 10, force());
    let out = c.compress(&" ".repeat(40), 0.3).unwrap();
    assert_eq!((out.origin_tokens, out.compressed_tokens), (0, 0));
    assert_eq!(out.ratio, 1.0);
    assert_eq!(out.compressed_text, "");
}

#[test]
fn smaller_target_never_keeps_more() {
    let text = passage(30);
    for max_chars in [1500, 200] {
        let c = AdaptiveCompressor::new(Arc::new(SalienceModel::new()), max_chars, force());
        let mut prev = usize::MAX;
        for target in [0.9f32, 0.7, 0.5, 0.3, 0.1] {
            let out = c.compress(&text, target).unwrap();
            assert!(out.compressed_tokens <= prev, "target {target} max_chars {max_chars}");
            prev = out.compressed_tokens;
        }
    }
}

#[test]
fn sentence_terminators_survive() {
    let c = AdaptiveCompressor::new(Arc::new(SalienceModel::new()), 1500, force());
    let text = "Valve seven is open.\nCheck the gauge now!\nIs the line clear?";
    let out = c.compress(text, 0.1).unwrap();
    assert!(out.compressed_text.contains("open."));
    assert!(out.compressed_text.contains("now!"));
    assert!(out.compressed_text.contains("clear?"));
    assert_eq!(out.compressed_text.lines().count(), 3);
}

#[test]
fn missing_model_fails_at_construction() {
    let tmp = tempfile::tempdir().unwrap();
    let settings = CompressionSettings {
        model_dir: tmp.path().join("absent").to_string_lossy().to_string(),
        use_fake: false,
        ..Default::default()
    };
    let err = AdaptiveCompressor::from_settings(&settings).err().unwrap();
    assert!(matches!(err, Error::ModelUnavailable(_)));
}

#[test]
fn slow_model_times_out() {
    let c = AdaptiveCompressor::new(Arc::new(Sleeper), 1500, force())
        .with_timeout(Some(Duration::from_millis(50)));
    let err = c.compress("some text", 0.5).unwrap_err();
    assert!(err.is_timeout());
}
