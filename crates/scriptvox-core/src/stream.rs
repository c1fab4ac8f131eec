//! Streaming synthesis over a bounded channel.
//!
//! A single producer task walks the script in order and pushes
//! [`AudioUnit`]s into a bounded `mpsc` channel; the caller drains it
//! through a [`SynthesisStream`]. When the channel is full the producer
//! waits, so at most `capacity` finished units plus the one in flight exist
//! at any time. Dropping or cancelling the stream stops the producer before
//! its next inference call, including one already queued for a blocking
//! thread.

use tokio::sync::mpsc;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{ScriptvoxError, ScriptvoxResult};
use crate::script::Script;
use crate::segmenter::split_sentences;
use crate::synthesis::{AudioUnit, ScriptPipeline, Synthesized, UnitKind};
use crate::voice_resolver::Resolution;
use crate::SAMPLE_RATE;

/// Messages from the producer task to the consumer
#[derive(Debug)]
enum StreamMessage {
    Unit(AudioUnit),
    Failed(ScriptvoxError),
    End,
}

/// Consumer side of a streaming synthesis request
#[derive(Debug)]
pub struct SynthesisStream {
    request_id: Uuid,
    sample_rate: u32,
    rx: mpsc::Receiver<StreamMessage>,
    finished: bool,
}

impl SynthesisStream {
    /// Id used in this request's log span
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Sample rate of every unit, known before the first one arrives
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Next unit in script order.
    ///
    /// Returns `None` once the end of the script has been delivered. A
    /// failed inference is delivered once as `Some(Err(_))` and ends the
    /// stream.
    pub async fn next_unit(&mut self) -> Option<ScriptvoxResult<AudioUnit>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(StreamMessage::Unit(unit)) => Some(Ok(unit)),
            Some(StreamMessage::Failed(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            Some(StreamMessage::End) => {
                self.finished = true;
                None
            }
            None => {
                self.finished = true;
                Some(Err(ScriptvoxError::concurrency(
                    "producer stopped before the end of the script",
                )))
            }
        }
    }

    /// Next unit's samples as little-endian `f32` bytes
    pub async fn next_chunk(&mut self) -> Option<ScriptvoxResult<Vec<u8>>> {
        self.next_unit()
            .await
            .map(|unit| unit.map(|u| u.to_le_bytes()))
    }

    /// Drain the remaining units.
    ///
    /// # Errors
    ///
    /// Returns the error that terminated the stream, if any.
    pub async fn collect_units(mut self) -> ScriptvoxResult<Vec<AudioUnit>> {
        let mut units = Vec::new();
        while let Some(unit) = self.next_unit().await {
            units.push(unit?);
        }
        Ok(units)
    }

    /// Stop the request. No further inference calls are issued; a call
    /// already running completes and its output is discarded.
    pub fn cancel(mut self) {
        self.rx.close();
        tracing::debug!(request_id = %self.request_id, "Stream cancelled by consumer");
    }
}

impl ScriptPipeline {
    /// Start streaming synthesis of `script`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn stream(&self, script: Script) -> SynthesisStream {
        let request_id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.channel_capacity());
        let span = tracing::info_span!("stream", %request_id, lines = script.len());

        tokio::spawn(produce(self.clone(), script, tx).instrument(span));

        SynthesisStream {
            request_id,
            sample_rate: SAMPLE_RATE,
            rx,
            finished: false,
        }
    }
}

async fn produce(pipeline: ScriptPipeline, script: Script, tx: mpsc::Sender<StreamMessage>) {
    match produce_units(&pipeline, script, &tx).await {
        Ok(Flow::Continue) => {
            let _ = tx.send(StreamMessage::End).await;
            tracing::info!("Stream complete");
        }
        Ok(Flow::Stop) => tracing::info!("Consumer went away, producer stopped"),
        Err(err) => {
            tracing::error!(category = err.category(), error = %err, "Stream aborted");
            let _ = tx.send(StreamMessage::Failed(err)).await;
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

async fn emit(tx: &mpsc::Sender<StreamMessage>, unit: AudioUnit) -> Flow {
    tracing::debug!(
        line = unit.line_index,
        sub = unit.sub_index,
        kind = ?unit.kind,
        samples = unit.samples.len(),
        "Queueing unit"
    );
    if tx.send(StreamMessage::Unit(unit)).await.is_err() {
        Flow::Stop
    } else {
        Flow::Continue
    }
}

async fn produce_units(
    pipeline: &ScriptPipeline,
    script: Script,
    tx: &mpsc::Sender<StreamMessage>,
) -> ScriptvoxResult<Flow> {
    for (line_index, line) in script.into_iter().enumerate() {
        let mut sub_index = 0;

        if line.delay_seconds() > 0.0 {
            let unit = AudioUnit::silence(line_index, line.delay_seconds());
            if emit(tx, unit).await == Flow::Stop {
                return Ok(Flow::Stop);
            }
            sub_index += 1;
        }

        let (active, resolution) = pipeline.prepare(&line);
        let Resolution::Resolved(target) = resolution else {
            tracing::warn!(line = line_index, "Voice unresolved, skipping line");
            continue;
        };

        for segment in split_sentences(line.text()) {
            if tx.is_closed() {
                return Ok(Flow::Stop);
            }
            let closed = tx.clone();
            let samples = match pipeline
                .synthesize_text(&active, segment, target.clone(), line.speed(), move || {
                    closed.is_closed()
                })
                .await?
            {
                Synthesized::Audio(samples) => samples,
                Synthesized::Silent => {
                    tracing::debug!(line = line_index, "Empty phonemes, segment skipped");
                    continue;
                }
                Synthesized::Cancelled => return Ok(Flow::Stop),
            };
            let unit = AudioUnit {
                line_index,
                sub_index,
                kind: UnitKind::Speech,
                samples,
            };
            if emit(tx, unit).await == Flow::Stop {
                return Ok(Flow::Stop);
            }
            sub_index += 1;
        }
    }
    Ok(Flow::Continue)
}
