//! Development and test backends.
//!
//! These exercise the full pipeline without any model inference: the dev
//! LLM echoes a canned reply, the dev TTS synthesizes an audible tone per
//! chunk, and the scripted variants let tests choose exact outputs.

use crate::backends::{LlmBackend, Phoneme, SttBackend, TtsBackend};
use crate::defaults;
use crate::error::{Result, VoxError};
use crate::pipeline::messages::AudioChunk;
use std::collections::HashMap;

/// STT backend that recognizes nothing (or a fixed transcript).
#[derive(Default)]
pub struct DevStt {
    transcript: Option<String>,
}

impl DevStt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always "recognize" the given text.
    pub fn with_transcript(mut self, text: impl Into<String>) -> Self {
        self.transcript = Some(text.into());
        self
    }
}

impl SttBackend for DevStt {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn transcribe(&mut self, _pcm: &[f32]) -> Result<String> {
        Ok(self.transcript.clone().unwrap_or_default())
    }
}

/// LLM backend that streams a canned echo reply word by word.
#[derive(Default)]
pub struct DevLlm;

impl DevLlm {
    pub fn new() -> Self {
        Self
    }

    fn reply(prompt: &str) -> String {
        format!("You said {}.", prompt.trim())
    }
}

impl LlmBackend for DevLlm {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        Ok(Self::reply(prompt))
    }

    fn generate_stream(
        &mut self,
        prompt: &str,
        on_fragment: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String> {
        let reply = Self::reply(prompt);
        let mut produced = String::new();
        for fragment in split_fragments(&reply) {
            produced.push_str(&fragment);
            if !on_fragment(&fragment) {
                break;
            }
        }
        Ok(produced)
    }
}

/// Splits text into word-sized fragments that keep their leading
/// whitespace, mimicking a token stream.
fn split_fragments(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_whitespace() && !current.trim().is_empty() {
            fragments.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        fragments.push(current);
    }
    fragments
}

/// TTS backend that synthesizes a sine tone proportional to the text
/// length, so the pipeline is audible end-to-end without a voice model.
pub struct DevTts {
    sample_rate: u32,
}

impl Default for DevTts {
    fn default() -> Self {
        Self {
            sample_rate: defaults::TTS_SAMPLE_RATE,
        }
    }
}

impl DevTts {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TtsBackend for DevTts {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn speak(&mut self, text: &str) -> Result<AudioChunk> {
        let words = text.split_whitespace().count().max(1);
        // 120ms of tone per word at 330Hz.
        let n = (self.sample_rate as usize * 120 / 1000) * words;
        let samples: Vec<i16> = (0..n)
            .map(|i| {
                let t = i as f32 / self.sample_rate as f32;
                (8000.0 * (2.0 * std::f32::consts::PI * 330.0 * t).sin()) as i16
            })
            .collect();
        Ok(AudioChunk::new(samples, self.sample_rate))
    }

    fn speak_with_timings(&mut self, text: &str) -> Result<(AudioChunk, Vec<Phoneme>)> {
        let chunk = self.speak(text)?;
        let phonemes = text
            .split_whitespace()
            .enumerate()
            .map(|(i, _)| Phoneme {
                id: i as i64,
                duration_secs: 0.12,
            })
            .collect();
        Ok((chunk, phonemes))
    }
}

/// Scripted LLM for tests: maps prompts to exact fragment sequences.
#[derive(Default)]
pub struct ScriptedLlm {
    responses: HashMap<String, Vec<String>>,
    antiprompts: Vec<String>,
    fail_init: bool,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to `prompt` with exactly these fragments.
    pub fn with_response(mut self, prompt: &str, fragments: &[&str]) -> Self {
        self.responses.insert(
            prompt.to_string(),
            fragments.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    pub fn with_antiprompt(mut self, stop: &str) -> Self {
        self.antiprompts.push(stop.to_string());
        self
    }

    pub fn with_init_failure(mut self) -> Self {
        self.fail_init = true;
        self
    }
}

impl LlmBackend for ScriptedLlm {
    fn init(&mut self) -> Result<()> {
        if self.fail_init {
            return Err(VoxError::LlmBackend {
                message: "scripted init failure".to_string(),
            });
        }
        Ok(())
    }

    fn generate(&mut self, prompt: &str) -> Result<String> {
        Ok(self
            .responses
            .get(prompt)
            .map(|fragments| fragments.concat())
            .unwrap_or_default())
    }

    fn generate_stream(
        &mut self,
        prompt: &str,
        on_fragment: &mut dyn FnMut(&str) -> bool,
    ) -> Result<String> {
        let fragments = self.responses.get(prompt).cloned().unwrap_or_default();
        let mut produced = String::new();
        for fragment in fragments {
            produced.push_str(&fragment);
            if !on_fragment(&fragment) {
                break;
            }
        }
        Ok(produced)
    }

    fn antiprompts(&self) -> &[String] {
        &self.antiprompts
    }
}

/// Scripted TTS for tests: a fixed number of samples per request.
pub struct ScriptedTts {
    samples_per_chunk: usize,
    sample_rate: u32,
    phonemes_per_chunk: usize,
    spoken: Vec<String>,
}

impl Default for ScriptedTts {
    fn default() -> Self {
        Self {
            samples_per_chunk: 1024,
            sample_rate: defaults::TTS_SAMPLE_RATE,
            phonemes_per_chunk: 0,
            spoken: Vec::new(),
        }
    }
}

impl ScriptedTts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_samples_per_chunk(mut self, n: usize) -> Self {
        self.samples_per_chunk = n;
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    pub fn with_phonemes_per_chunk(mut self, n: usize) -> Self {
        self.phonemes_per_chunk = n;
        self
    }

    /// Texts spoken so far.
    pub fn spoken(&self) -> &[String] {
        &self.spoken
    }
}

impl TtsBackend for ScriptedTts {
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    fn speak(&mut self, text: &str) -> Result<AudioChunk> {
        self.spoken.push(text.to_string());
        Ok(AudioChunk::new(
            vec![1000i16; self.samples_per_chunk],
            self.sample_rate,
        ))
    }

    fn speak_with_timings(&mut self, text: &str) -> Result<(AudioChunk, Vec<Phoneme>)> {
        let chunk = self.speak(text)?;
        let phonemes = (0..self.phonemes_per_chunk)
            .map(|i| Phoneme {
                id: i as i64,
                duration_secs: 0.08,
            })
            .collect();
        Ok((chunk, phonemes))
    }
}

/// Builds the configured backend set from the models section of the config.
///
/// "dev" is the only built-in kind; real engine adapters register here.
pub fn from_config(
    models: &crate::config::ModelsConfig,
) -> Result<(
    Box<dyn SttBackend>,
    Box<dyn LlmBackend>,
    Box<dyn TtsBackend>,
)> {
    let stt: Box<dyn SttBackend> = match models.stt.kind.as_str() {
        "dev" => Box::new(DevStt::new()),
        other => {
            return Err(VoxError::ConfigInvalidValue {
                key: "models.stt.kind".to_string(),
                message: format!("unknown STT backend '{other}' (built-in: dev)"),
            });
        }
    };
    let llm: Box<dyn LlmBackend> = match models.llm.kind.as_str() {
        "dev" => Box::new(DevLlm::new()),
        other => {
            return Err(VoxError::ConfigInvalidValue {
                key: "models.llm.kind".to_string(),
                message: format!("unknown LLM backend '{other}' (built-in: dev)"),
            });
        }
    };
    let tts: Box<dyn TtsBackend> = match models.tts.kind.as_str() {
        "dev" => Box::new(DevTts::new()),
        other => {
            return Err(VoxError::ConfigInvalidValue {
                key: "models.tts.kind".to_string(),
                message: format!("unknown TTS backend '{other}' (built-in: dev)"),
            });
        }
    };
    Ok((stt, llm, tts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_llm_streams_whole_reply() {
        let mut llm = DevLlm::new();
        let mut collected = String::new();
        let full = llm
            .generate_stream("hello", &mut |frag| {
                collected.push_str(frag);
                true
            })
            .unwrap();
        assert_eq!(collected, "You said hello.");
        assert_eq!(full, collected);
    }

    #[test]
    fn test_dev_llm_halts_on_false() {
        let mut llm = DevLlm::new();
        let mut count = 0;
        llm.generate_stream("one two three", &mut |_| {
            count += 1;
            count < 2
        })
        .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_split_fragments_preserves_text() {
        let text = "The quick brown fox.";
        let fragments = split_fragments(text);
        assert_eq!(fragments.concat(), text);
        assert!(fragments.len() >= 4);
    }

    #[test]
    fn test_dev_tts_produces_audio() {
        let mut tts = DevTts::new();
        let chunk = tts.speak("hello there").unwrap();
        assert!(!chunk.samples.is_empty());
        assert_eq!(chunk.sample_rate, defaults::TTS_SAMPLE_RATE);

        let (_, phonemes) = tts.speak_with_timings("hello there").unwrap();
        assert_eq!(phonemes.len(), 2);
    }

    #[test]
    fn test_scripted_llm_fragments() {
        let mut llm = ScriptedLlm::new().with_response("hello", &["Hi ", "there."]);
        let mut fragments = Vec::new();
        llm.generate_stream("hello", &mut |frag| {
            fragments.push(frag.to_string());
            true
        })
        .unwrap();
        assert_eq!(fragments, vec!["Hi ", "there."]);
    }

    #[test]
    fn test_scripted_llm_unknown_prompt() {
        let mut llm = ScriptedLlm::new();
        assert_eq!(llm.generate("nothing").unwrap(), "");
    }

    #[test]
    fn test_from_config_dev_kinds() {
        let models = crate::config::ModelsConfig::default();
        assert!(from_config(&models).is_ok());
    }

    #[test]
    fn test_from_config_unknown_kind() {
        let mut models = crate::config::ModelsConfig::default();
        models.llm.kind = "gpt-42".to_string();
        let result = from_config(&models);
        assert!(matches!(
            result,
            Err(VoxError::ConfigInvalidValue { .. })
        ));
    }
}
