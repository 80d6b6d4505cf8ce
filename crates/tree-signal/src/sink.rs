//! Layout output
//!
//! Every published [`LayoutUpdate`] is forwarded to a [`LayoutSink`]. The
//! stock sink writes one JSON object per line with each frame carrying its
//! color scheme.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tree_signal_core::prelude::*;
use tree_signal_palette::{ColorScheme, ColorService};

/// Destination for layout updates
#[async_trait]
pub(crate) trait LayoutSink: Send {
    async fn publish(&mut self, update: &LayoutUpdate) -> Result<()>;

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WireFrame<'a> {
    channel: String,
    rect: &'a LayoutRect,
    state: PanelState,
    weight: f64,
    colors: ColorScheme,
}

#[derive(Debug, Serialize)]
struct WireUpdate<'a> {
    sequence: u64,
    reason: UpdateReason,
    generated_at: Timestamp,
    frames: Vec<WireFrame<'a>>,
}

/// Newline-delimited JSON over any async writer
pub(crate) struct JsonLinesSink<W> {
    writer: W,
    colors: Arc<ColorService>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub(crate) fn new(writer: W, colors: Arc<ColorService>) -> Self {
        Self { writer, colors }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.writer
    }

    fn encode(&self, update: &LayoutUpdate) -> Result<Vec<u8>> {
        let frames = update
            .frames
            .iter()
            .map(|frame| {
                let channel = frame.path.to_string();
                let colors = self.colors.scheme_for(&channel);
                WireFrame {
                    channel,
                    rect: &frame.rect,
                    state: frame.state,
                    weight: frame.weight,
                    colors,
                }
            })
            .collect::<Vec<_>>();
        // channels that left the layout give up their color slot
        let live: HashSet<&str> = frames.iter().map(|frame| frame.channel.as_str()).collect();
        self.colors.retain(|channel| live.contains(channel));

        let wire = WireUpdate {
            sequence: update.sequence,
            reason: update.reason,
            generated_at: update.generated_at,
            frames,
        };
        let mut line = serde_json::to_vec(&wire)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[async_trait]
impl<W> LayoutSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn publish(&mut self, update: &LayoutUpdate) -> Result<()> {
        let line = self.encode(update)?;
        self.writer
            .write_all(&line)
            .await
            .context("writing layout update")?;
        // consumers read line by line
        self.writer.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Forward layouts to `sink` until `shutdown` turns true or the service goes
/// away. The current layout is sent first, and a layout published just
/// before shutdown is still delivered. Returns the number of updates written.
pub(crate) async fn broadcast<S>(
    mut updates: watch::Receiver<Arc<LayoutUpdate>>,
    sink: &mut S,
    mut shutdown: watch::Receiver<bool>,
) -> Result<u64>
where
    S: LayoutSink + ?Sized,
{
    let mut published = 0u64;

    let initial = Arc::clone(&updates.borrow_and_update());
    sink.publish(&initial).await?;
    published += 1;

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    tracing::debug!("layout publisher closed");
                    break;
                }
                let update = Arc::clone(&updates.borrow_and_update());
                sink.publish(&update).await?;
                published += 1;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    if updates.has_changed().unwrap_or(false) {
                        let update = Arc::clone(&updates.borrow_and_update());
                        sink.publish(&update).await?;
                        published += 1;
                    }
                    break;
                }
            }
        }
    }

    sink.flush().await?;
    tracing::debug!(published, "broadcaster stopped");
    Ok(published)
}
