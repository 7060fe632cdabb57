//! Yadif ("yet another deinterlacing filter").
//!
//! Keeps a three-frame window per source. Each output keeps the rows of one
//! field and rebuilds the others from an edge-directed spatial prediction,
//! clamped by the temporal neighbours.

use crate::view::{par_rows, ImageView, Pixel};
use serde::{Deserialize, Serialize};
use stagecast_core::{Result, StageError};
use stagecast_gpu::{BufferDesc, ComputeDevice, ImageBuffer, JobKey, JobQueue, Kernel, KernelArgs};
use std::sync::Arc;
use tracing::debug;

/// Output cadence and whether the spatial interlacing check runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum YadifMode {
    /// One frame per input frame.
    #[default]
    SendFrame,
    /// One frame per field.
    SendField,
    SendFrameNoSpatial,
    SendFieldNoSpatial,
}

impl YadifMode {
    pub fn outputs_per_frame(self) -> usize {
        match self {
            Self::SendFrame | Self::SendFrameNoSpatial => 1,
            Self::SendField | Self::SendFieldNoSpatial => 2,
        }
    }

    pub fn spatial_check(self) -> bool {
        matches!(self, Self::SendFrame | Self::SendField)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrder {
    #[default]
    TopFirst,
    BottomFirst,
}

/// Bias in favour of the vertical direction, one 8-bit code value.
const SCORE_BIAS: f32 = 1.0 / 255.0;

#[inline]
fn absdiff(a: f32, b: f32) -> f32 {
    (a - b).abs()
}

struct Rows<'a> {
    prev: ImageView<'a>,
    cur: ImageView<'a>,
    next: ImageView<'a>,
}

/// Rebuild one channel of one pixel in a missing row.
fn filter_pixel(rows: &Rows<'_>, parity: usize, spatial_check: bool, x: usize, y: usize, c: usize) -> f32 {
    let (x, y) = (x as isize, y as isize);
    let at = |img: &ImageView<'_>, dx: isize, dy: isize| img.clamped(x + dx, y + dy)[c];
    let (prev2, next2) = if parity == 1 {
        (&rows.prev, &rows.cur)
    } else {
        (&rows.cur, &rows.next)
    };
    let cur = &rows.cur;

    let above = at(cur, 0, -1);
    let below = at(cur, 0, 1);
    let temporal = (at(prev2, 0, 0) + at(next2, 0, 0)) * 0.5;
    let td0 = absdiff(at(prev2, 0, 0), at(next2, 0, 0));
    let td1 = (absdiff(at(&rows.prev, 0, -1), above) + absdiff(at(&rows.prev, 0, 1), below)) * 0.5;
    let td2 = (absdiff(at(&rows.next, 0, -1), above) + absdiff(at(&rows.next, 0, 1), below)) * 0.5;
    let mut diff = (td0 * 0.5).max(td1).max(td2);

    let mut spatial_pred = (above + below) * 0.5;
    let mut spatial_score = absdiff(at(cur, -1, -1), at(cur, -1, 1))
        + absdiff(above, below)
        + absdiff(at(cur, 1, -1), at(cur, 1, 1))
        - SCORE_BIAS;

    let score = |j: isize| {
        absdiff(at(cur, j - 1, -1), at(cur, -j - 1, 1))
            + absdiff(at(cur, j, -1), at(cur, -j, 1))
            + absdiff(at(cur, j + 1, -1), at(cur, -j + 1, 1))
    };
    // each direction only extends to the steeper slope if the first improved
    for dir in [-1isize, 1] {
        for j in [dir, 2 * dir] {
            let s = score(j);
            if s < spatial_score {
                spatial_score = s;
                spatial_pred = (at(cur, j, -1) + at(cur, -j, 1)) * 0.5;
            } else {
                break;
            }
        }
    }

    if spatial_check {
        let b = (at(prev2, 0, -2) + at(next2, 0, -2)) * 0.5;
        let f = (at(prev2, 0, 2) + at(next2, 0, 2)) * 0.5;
        let max = (temporal - below).max(temporal - above).max((b - above).min(f - below));
        let min = (temporal - below).min(temporal - above).min((b - above).max(f - below));
        diff = diff.max(min).max(-max);
    }

    spatial_pred.clamp(temporal - diff, temporal + diff)
}

struct YadifKernel;

impl Kernel for YadifKernel {
    fn name(&self) -> &str {
        "yadif"
    }

    fn run(&self, args: &KernelArgs) -> Result<()> {
        let prev = args.get_buffer("prev")?;
        let cur = args.get_buffer("cur")?;
        let next = args.get_buffer("next")?;
        let output = args.get_buffer("output")?;
        let parity = args.get_uint("parity")? as usize;
        let spatial_check = args.get_uint("spatial_check")? != 0;
        let (w, h) = (output.width(), output.height());

        let (p, c, n) = (prev.read()?, cur.read()?, next.read()?);
        let rows = Rows {
            prev: ImageView::new(&p, w, h)?,
            cur: ImageView::new(&c, w, h)?,
            next: ImageView::new(&n, w, h)?,
        };
        let mut out = output.write()?;
        par_rows(&mut out, w, h, |y, row| {
            if (y ^ parity) & 1 == 0 {
                row.copy_from_slice(rows.cur.row(y));
                return;
            }
            for (x, px) in row.iter_mut().enumerate() {
                let built: Pixel = std::array::from_fn(|ch| filter_pixel(&rows, parity, spatial_check, x, y, ch));
                *px = built;
            }
        })
    }
}

/// Per-source deinterlacer state.
pub struct Yadif {
    kernel: Arc<YadifKernel>,
    device: Arc<dyn ComputeDevice>,
    mode: YadifMode,
    order: FieldOrder,
    /// prev, cur, next
    window: [Option<ImageBuffer>; 3],
}

impl Yadif {
    pub fn new(device: Arc<dyn ComputeDevice>, mode: YadifMode, order: FieldOrder) -> Self {
        debug!(?mode, ?order, "yadif ready");
        Self {
            kernel: Arc::new(YadifKernel),
            device,
            mode,
            order,
            window: [None, None, None],
        }
    }

    pub fn mode(&self) -> YadifMode {
        self.mode
    }

    /// Frames currently held.
    pub fn buffered(&self) -> usize {
        self.window.iter().flatten().count()
    }

    /// Shift `frame` into the window, taking over the caller's reference, and
    /// add the deinterlace jobs for the middle frame to the batch for `key`.
    ///
    /// Returns the output buffers, valid once the batch has run; empty until
    /// three frames have been seen. Field outputs carry timestamps at twice
    /// the input rate.
    pub fn push(&mut self, queue: &JobQueue, key: &JobKey, frame: ImageBuffer) -> Result<Vec<ImageBuffer>> {
        if let Some(old) = self.window[0].take() {
            let _ = old.release();
        }
        self.window.rotate_left(1);
        self.window[2] = Some(frame);

        let [Some(prev), Some(cur), Some(next)] = &self.window else {
            return Ok(Vec::new());
        };
        if prev.width() != cur.width() || next.width() != cur.width() || prev.height() != cur.height() || next.height() != cur.height() {
            return Err(StageError::Config("yadif window frames differ in size".into()));
        }

        let tff = usize::from(self.order == FieldOrder::TopFirst);
        let outputs = self.mode.outputs_per_frame();
        let mut produced = Vec::with_capacity(outputs);
        for second in 0..outputs {
            // the first output keeps the first field's rows
            let parity = tff ^ usize::from(second == 0);
            let timestamp = if outputs == 2 {
                cur.timestamp() * 2 + second as i64
            } else {
                cur.timestamp()
            };
            match self.add_field_job(queue, key, [prev, cur, next], parity, timestamp) {
                Ok(output) => produced.push(output),
                Err(e) => {
                    // drop the half-built batch so its callbacks give back the window refs
                    if !produced.is_empty() {
                        queue.clear_queue(&key.source_id);
                    }
                    for output in produced {
                        let _ = output.release();
                    }
                    return Err(e);
                }
            }
        }
        Ok(produced)
    }

    fn add_field_job(
        &self,
        queue: &JobQueue,
        key: &JobKey,
        window: [&ImageBuffer; 3],
        parity: usize,
        timestamp: i64,
    ) -> Result<ImageBuffer> {
        let [prev, cur, next] = window;
        let output = self.device.create_buffer(BufferDesc::image("yadif", cur.width(), cur.height(), timestamp))?;
        let args = KernelArgs::new()
            .buffer("prev", prev)
            .buffer("cur", cur)
            .buffer("next", next)
            .buffer("output", &output)
            .uint("parity", parity as u32)
            .uint("spatial_check", u32::from(self.mode.spatial_check()));

        let mut added = Vec::with_capacity(3);
        for buffer in window {
            match buffer.add_ref() {
                Ok(()) => added.push(buffer.clone()),
                Err(e) => {
                    for b in added {
                        let _ = b.release();
                    }
                    let _ = output.release();
                    return Err(e);
                }
            }
        }
        queue.add(key.clone(), "yadif", self.kernel.clone(), args, move || {
            for b in added {
                let _ = b.release();
            }
        });
        Ok(output)
    }

    /// Release every held frame at end of stream.
    pub fn flush(&mut self) {
        for slot in &mut self.window {
            if let Some(buffer) = slot.take() {
                let _ = buffer.release();
            }
        }
    }
}

impl Drop for Yadif {
    fn drop(&mut self) {
        self.flush();
    }
}
