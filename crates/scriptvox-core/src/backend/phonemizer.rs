//! Phonemizers.
//!
//! [`EspeakPhonemizer`] links eSpeak NG through `espeak-rs` and is only
//! compiled with the `espeak` feature. Without it, callers must hand in IPA
//! themselves through [`IpaPassthrough`].

use crate::backend::Phonemizer;
use crate::error::ScriptvoxResult;

/// Treats the input text as phonemes already.
///
/// Useful when callers phonemize upstream, and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpaPassthrough;

impl Phonemizer for IpaPassthrough {
    fn phonemize(&self, text: &str, _locale: &str) -> ScriptvoxResult<String> {
        Ok(text.trim().to_string())
    }
}

#[cfg(feature = "espeak")]
pub use self::espeak::EspeakPhonemizer;

#[cfg(feature = "espeak")]
mod espeak {
    use parking_lot::Mutex;

    use crate::backend::Phonemizer;
    use crate::error::{ScriptvoxError, ScriptvoxResult};

    // eSpeak NG keeps global state and is not thread-safe
    static ESPEAK_LOCK: Mutex<()> = parking_lot::const_mutex(());

    /// eSpeak NG text to IPA, stress marks kept
    #[derive(Debug, Clone, Copy, Default)]
    pub struct EspeakPhonemizer;

    impl EspeakPhonemizer {
        /// Phonemizer for every locale eSpeak NG knows
        #[must_use]
        pub const fn new() -> Self {
            Self
        }

        /// Phonemize a short word to check that the library and its data
        /// are usable for `locale`.
        ///
        /// # Errors
        ///
        /// Returns a configuration error when eSpeak NG cannot translate.
        pub fn probe(&self, locale: &str) -> ScriptvoxResult<()> {
            translate("test", locale)
                .map(|_| ())
                .map_err(ScriptvoxError::configuration)
        }
    }

    fn translate(text: &str, locale: &str) -> Result<String, String> {
        let _guard = ESPEAK_LOCK.lock();
        espeak_rs::text_to_phonemes(text, locale, None, true, false)
            .map(|clauses| clauses.join(" "))
            .map_err(|e| format!("eSpeak NG failed for locale '{locale}': {e:?}"))
    }

    impl Phonemizer for EspeakPhonemizer {
        fn phonemize(&self, text: &str, locale: &str) -> ScriptvoxResult<String> {
            if text.trim().is_empty() {
                return Ok(String::new());
            }
            let phonemes = translate(text, locale).map_err(ScriptvoxError::inference)?;
            let phonemes = phonemes.split_whitespace().collect::<Vec<_>>().join(" ");
            tracing::debug!(locale, chars = phonemes.chars().count(), "Phonemized text");
            Ok(phonemes)
        }
    }

}
