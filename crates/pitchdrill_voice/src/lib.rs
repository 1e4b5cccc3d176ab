//! Voice module for PitchDrill
//!
//! Speech-to-Text (STT) turns the trainee's recorded audio into a text turn.
//! Text-to-Speech (TTS) voices the persona's reply. Both are thin clients of
//! the hosted speech endpoints; the traits let tests swap them out.

mod openai;
mod stt;
mod tts;

pub use openai::{OpenAiSpeech, OpenAiWhisper};
pub use stt::{AudioFormat, SpeechToText};
pub use tts::TextToSpeech;
