//! Resolves a line's voice reference into something a backend can speak with.

use std::sync::Arc;

use crate::backend::SpeechBackend;
use crate::script::{BlendComponent, VoiceRef};

/// What the backend is asked to speak with
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceTarget {
    /// A voice identity passed through to the backend
    Named(String),
    /// A precomputed style embedding
    Embedding(Arc<[f32]>),
}

/// Outcome of resolving a voice reference
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The line can be synthesized with this target
    Resolved(VoiceTarget),
    /// The voice is unknown; the line contributes no speech
    Skip,
}

/// Resolve `voice` against the voices `backend` knows.
///
/// Unknown single voices resolve to [`Resolution::Skip`]. Blends never skip:
/// unknown components are dropped and an all-unknown blend yields the zero
/// embedding.
#[must_use]
pub fn resolve(voice: &VoiceRef, backend: &dyn SpeechBackend) -> Resolution {
    match voice {
        VoiceRef::Identity(id) => {
            if backend.embedding(id).is_some() {
                Resolution::Resolved(VoiceTarget::Named(id.clone()))
            } else {
                tracing::warn!(voice = %id, "Unknown voice, line will be skipped");
                Resolution::Skip
            }
        }
        VoiceRef::Blend(components) => {
            Resolution::Resolved(VoiceTarget::Embedding(blend(components, backend).into()))
        }
    }
}

/// Weighted average of the known component embeddings.
///
/// Only components the backend knows contribute to the numerator and the
/// weight total. When the applied weight is zero the result is the zero
/// vector of the backend's embedding length.
#[must_use]
pub fn blend(components: &[BlendComponent], backend: &dyn SpeechBackend) -> Vec<f32> {
    let len = backend.embedding_len();
    let mut sum = vec![0.0_f32; len];
    let mut applied = 0.0_f32;

    for component in components {
        let Some(embedding) = backend.embedding(&component.voice) else {
            tracing::debug!(voice = %component.voice, "Dropping unknown blend component");
            continue;
        };
        if embedding.len() != len {
            tracing::warn!(
                voice = %component.voice,
                expected = len,
                actual = embedding.len(),
                "Dropping blend component with mismatched embedding length"
            );
            continue;
        }
        for (acc, value) in sum.iter_mut().zip(embedding) {
            *acc += value * component.weight;
        }
        applied += component.weight;
    }

    if applied > 0.0 {
        for acc in &mut sum {
            *acc /= applied;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScriptvoxResult;
    use proptest::prelude::*;
    use std::collections::HashMap;

    #[derive(Debug)]
    struct TableBackend {
        voices: HashMap<String, Vec<f32>>,
    }

    impl TableBackend {
        fn new() -> Self {
            let mut voices = HashMap::new();
            voices.insert("am_adam".to_string(), vec![1.0, 0.0, 2.0, -1.0]);
            voices.insert("af_nova".to_string(), vec![3.0, 2.0, 0.0, 1.0]);
            voices.insert("af_sky".to_string(), vec![-2.0, 4.0, 1.0, 0.5]);
            Self { voices }
        }
    }

    impl SpeechBackend for TableBackend {
        fn known_voices(&self) -> Vec<String> {
            self.voices.keys().cloned().collect()
        }

        fn embedding(&self, voice: &str) -> Option<&[f32]> {
            self.voices.get(voice).map(Vec::as_slice)
        }

        fn embedding_len(&self) -> usize {
            4
        }

        fn synthesize(&self, _: &str, _: &VoiceTarget, _: f32) -> ScriptvoxResult<Vec<f32>> {
            Ok(Vec::new())
        }
    }

    fn assert_close(a: &[f32], b: &[f32]) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b) {
            assert!((x - y).abs() < 1e-4, "{a:?} != {b:?}");
        }
    }

    #[test]
    fn test_known_identity_passes_through() {
        let backend = TableBackend::new();
        let resolution = resolve(&VoiceRef::Identity("af_sky".into()), &backend);
        assert_eq!(resolution, Resolution::Resolved(VoiceTarget::Named("af_sky".into())));
    }

    #[test]
    fn test_unknown_identity_skips() {
        let backend = TableBackend::new();
        assert_eq!(resolve(&VoiceRef::Identity("zz_ghost".into()), &backend), Resolution::Skip);
    }

    #[test]
    fn test_equal_blend_is_average() {
        let backend = TableBackend::new();
        let mixed = blend(
            &[BlendComponent::new("am_adam", 0.5), BlendComponent::new("af_nova", 0.5)],
            &backend,
        );
        assert_close(&mixed, &[2.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_weights_need_not_sum_to_one() {
        let backend = TableBackend::new();
        let small = blend(
            &[BlendComponent::new("am_adam", 0.1), BlendComponent::new("af_nova", 0.3)],
            &backend,
        );
        let large = blend(
            &[BlendComponent::new("am_adam", 0.25), BlendComponent::new("af_nova", 0.75)],
            &backend,
        );
        assert_close(&small, &large);
    }

    #[test]
    fn test_unknown_components_excluded_from_weight_total() {
        let backend = TableBackend::new();
        let mixed = blend(
            &[BlendComponent::new("am_adam", 0.4), BlendComponent::new("zz_ghost", 1.0)],
            &backend,
        );
        assert_close(&mixed, &[1.0, 0.0, 2.0, -1.0]);
    }

    #[test]
    fn test_all_unknown_blend_is_zero_vector() {
        let backend = TableBackend::new();
        let resolution = resolve(
            &VoiceRef::Blend(vec![BlendComponent::new("zz_ghost", 1.0)]),
            &backend,
        );
        match resolution {
            Resolution::Resolved(VoiceTarget::Embedding(e)) => assert_close(&e, &[0.0; 4]),
            other => panic!("expected zero embedding, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_weights_yield_zero_vector() {
        let backend = TableBackend::new();
        let mixed = blend(
            &[BlendComponent::new("am_adam", 0.0), BlendComponent::new("af_nova", 0.0)],
            &backend,
        );
        assert_close(&mixed, &[0.0; 4]);
    }

    proptest! {
        #[test]
        fn prop_blend_is_permutation_invariant(
            weights in proptest::collection::vec(0.0_f32..=1.0, 3),
            rotation in 0_usize..3,
            reverse in any::<bool>(),
        ) {
            let backend = TableBackend::new();
            let names = ["am_adam", "af_nova", "af_sky"];
            let components: Vec<_> = names
                .iter()
                .zip(&weights)
                .map(|(name, w)| BlendComponent::new(*name, *w))
                .collect();

            let mut shuffled = components.clone();
            shuffled.rotate_left(rotation);
            if reverse {
                shuffled.reverse();
            }

            let a = blend(&components, &backend);
            let b = blend(&shuffled, &backend);
            for (x, y) in a.iter().zip(&b) {
                prop_assert!((x - y).abs() < 1e-3);
            }
        }
    }
}
