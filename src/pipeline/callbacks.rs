//! Event callback slots shared by all protocol adapters.
//!
//! Each slot holds at most one boxed callback, replaced wholesale by its
//! setter under a lock. Callbacks are invoked synchronously from the owning
//! connection's read task, so delivery order matches wire arrival order and
//! a slow callback delays further message processing for that connection.

use crate::tools::ToolInvocation;
use crate::Error;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type AudioOutCallback = Box<dyn Fn(&[u8]) + Send + Sync>;
pub type VoidCallback = Box<dyn Fn() + Send + Sync>;
pub type TextCallback = Box<dyn Fn(&str, bool) + Send + Sync>;
pub type ToolCallCallback = Box<dyn Fn(ToolInvocation) + Send + Sync>;
pub type ErrorCallback = Box<dyn Fn(&Error) + Send + Sync>;

fn slot<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct EventCallbacks {
    on_audio_out: Mutex<Option<AudioOutCallback>>,
    on_speech_start: Mutex<Option<VoidCallback>>,
    on_speech_end: Mutex<Option<VoidCallback>>,
    on_transcript: Mutex<Option<TextCallback>>,
    on_response: Mutex<Option<TextCallback>>,
    on_tool_call: Mutex<Option<ToolCallCallback>>,
    on_error: Mutex<Option<ErrorCallback>>,
    on_interruption: Mutex<Option<VoidCallback>>,
}

impl EventCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_audio_out(&self, f: impl Fn(&[u8]) + Send + Sync + 'static) {
        *slot(&self.on_audio_out) = Some(Box::new(f));
    }

    pub fn set_on_speech_start(&self, f: impl Fn() + Send + Sync + 'static) {
        *slot(&self.on_speech_start) = Some(Box::new(f));
    }

    pub fn set_on_speech_end(&self, f: impl Fn() + Send + Sync + 'static) {
        *slot(&self.on_speech_end) = Some(Box::new(f));
    }

    pub fn set_on_transcript(&self, f: impl Fn(&str, bool) + Send + Sync + 'static) {
        *slot(&self.on_transcript) = Some(Box::new(f));
    }

    pub fn set_on_response(&self, f: impl Fn(&str, bool) + Send + Sync + 'static) {
        *slot(&self.on_response) = Some(Box::new(f));
    }

    /// Registering an external tool-call callback bypasses the batched
    /// dispatcher entirely; the callback becomes responsible for submitting
    /// results.
    pub fn set_on_tool_call(&self, f: impl Fn(ToolInvocation) + Send + Sync + 'static) {
        *slot(&self.on_tool_call) = Some(Box::new(f));
    }

    pub fn set_on_error(&self, f: impl Fn(&Error) + Send + Sync + 'static) {
        *slot(&self.on_error) = Some(Box::new(f));
    }

    pub fn set_on_interruption(&self, f: impl Fn() + Send + Sync + 'static) {
        *slot(&self.on_interruption) = Some(Box::new(f));
    }

    pub(crate) fn emit_audio_out(&self, pcm: &[u8]) {
        if let Some(f) = slot(&self.on_audio_out).as_ref() {
            f(pcm);
        }
    }

    pub(crate) fn emit_speech_start(&self) {
        if let Some(f) = slot(&self.on_speech_start).as_ref() {
            f();
        }
    }

    pub(crate) fn emit_speech_end(&self) {
        if let Some(f) = slot(&self.on_speech_end).as_ref() {
            f();
        }
    }

    pub(crate) fn emit_transcript(&self, text: &str, is_final: bool) {
        if let Some(f) = slot(&self.on_transcript).as_ref() {
            f(text, is_final);
        }
    }

    pub(crate) fn emit_response(&self, text: &str, is_final: bool) {
        if let Some(f) = slot(&self.on_response).as_ref() {
            f(text, is_final);
        }
    }

    /// Returns whether an external callback consumed the call.
    pub(crate) fn emit_tool_call(&self, call: ToolInvocation) -> bool {
        if let Some(f) = slot(&self.on_tool_call).as_ref() {
            f(call);
            true
        } else {
            false
        }
    }

    pub(crate) fn emit_error(&self, error: &Error) {
        if let Some(f) = slot(&self.on_error).as_ref() {
            f(error);
        }
    }

    pub(crate) fn emit_interruption(&self) {
        if let Some(f) = slot(&self.on_interruption).as_ref() {
            f();
        }
    }
}
