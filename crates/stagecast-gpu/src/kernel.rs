//! Kernel programs and their bound arguments.

use crate::buffer::ImageBuffer;
use stagecast_core::{Result, StageError};
use std::collections::BTreeMap;

/// A compiled kernel program.
///
/// Kernels are built once per stage and invoked every frame with freshly
/// bound [`KernelArgs`]. A kernel never writes a buffer it also reads.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;

    /// Execute over the whole output.
    fn run(&self, args: &KernelArgs) -> Result<()>;
}

/// A single bound kernel argument.
#[derive(Debug, Clone)]
pub enum KernelArg {
    Buffer(ImageBuffer),
    Buffers(Vec<ImageBuffer>),
    Int(i32),
    Uint(u32),
    Float(f32),
    Floats(Vec<f32>),
}

/// Named arguments for one kernel invocation.
#[derive(Debug, Clone, Default)]
pub struct KernelArgs {
    args: BTreeMap<&'static str, KernelArg>,
}

fn missing(name: &str, kind: &str) -> StageError {
    StageError::Config(format!("kernel argument '{name}' missing or not {kind}"))
}

impl KernelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &'static str, arg: KernelArg) -> &mut Self {
        self.args.insert(name, arg);
        self
    }

    pub fn buffer(mut self, name: &'static str, buffer: &ImageBuffer) -> Self {
        self.args.insert(name, KernelArg::Buffer(buffer.clone()));
        self
    }

    pub fn buffers(mut self, name: &'static str, buffers: &[ImageBuffer]) -> Self {
        self.args.insert(name, KernelArg::Buffers(buffers.to_vec()));
        self
    }

    pub fn int(mut self, name: &'static str, value: i32) -> Self {
        self.args.insert(name, KernelArg::Int(value));
        self
    }

    pub fn uint(mut self, name: &'static str, value: u32) -> Self {
        self.args.insert(name, KernelArg::Uint(value));
        self
    }

    pub fn float(mut self, name: &'static str, value: f32) -> Self {
        self.args.insert(name, KernelArg::Float(value));
        self
    }

    pub fn floats(mut self, name: &'static str, values: impl Into<Vec<f32>>) -> Self {
        self.args.insert(name, KernelArg::Floats(values.into()));
        self
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.args.contains_key(name)
    }

    pub fn get_buffer(&self, name: &str) -> Result<&ImageBuffer> {
        match self.args.get(name) {
            Some(KernelArg::Buffer(b)) => Ok(b),
            _ => Err(missing(name, "a buffer")),
        }
    }

    pub fn get_buffers(&self, name: &str) -> Result<&[ImageBuffer]> {
        match self.args.get(name) {
            Some(KernelArg::Buffers(b)) => Ok(b),
            _ => Err(missing(name, "a buffer list")),
        }
    }

    pub fn get_int(&self, name: &str) -> Result<i32> {
        match self.args.get(name) {
            Some(KernelArg::Int(v)) => Ok(*v),
            _ => Err(missing(name, "an int")),
        }
    }

    pub fn get_uint(&self, name: &str) -> Result<u32> {
        match self.args.get(name) {
            Some(KernelArg::Uint(v)) => Ok(*v),
            _ => Err(missing(name, "a uint")),
        }
    }

    pub fn get_float(&self, name: &str) -> Result<f32> {
        match self.args.get(name) {
            Some(KernelArg::Float(v)) => Ok(*v),
            _ => Err(missing(name, "a float")),
        }
    }

    pub fn get_floats(&self, name: &str) -> Result<&[f32]> {
        match self.args.get(name) {
            Some(KernelArg::Floats(v)) => Ok(v),
            _ => Err(missing(name, "a float array")),
        }
    }

    /// Every buffer referenced by these arguments.
    pub fn all_buffers(&self) -> impl Iterator<Item = &ImageBuffer> {
        self.args.values().flat_map(|arg| match arg {
            KernelArg::Buffer(b) => std::slice::from_ref(b),
            KernelArg::Buffers(bs) => bs.as_slice(),
            _ => &[] as &[ImageBuffer],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferDesc;

    #[test]
    fn test_typed_getters() {
        let buf = ImageBuffer::detached(BufferDesc::image("in", 2, 2, 0));
        let args = KernelArgs::new()
            .buffer("input", &buf)
            .uint("width", 2)
            .float("mix", 0.5)
            .floats("matrix", [1.0, 0.0, 0.0]);
        assert_eq!(args.get_uint("width").unwrap(), 2);
        assert_eq!(args.get_float("mix").unwrap(), 0.5);
        assert_eq!(args.get_floats("matrix").unwrap().len(), 3);
        assert!(args.get_buffer("input").unwrap().same_buffer(&buf));
        assert_eq!(args.all_buffers().count(), 1);
    }

    #[test]
    fn test_missing_or_wrong_type_is_config_error() {
        let args = KernelArgs::new().int("count", 3);
        assert!(matches!(args.get_uint("count"), Err(StageError::Config(_))));
        assert!(matches!(args.get_buffer("output"), Err(StageError::Config(_))));
    }
}
