//! Opaque encode/decode capabilities for values crossing the wire.
//!
//! The execution core never interprets element bytes itself; it is handed a
//! [`Coder`] for each type it must ship back to the runner and treats it as a
//! capability. [`BincodeCoder`] is the default implementation for types that
//! already carry serde derives, and [`FullWindowedValueCoder`] composes a
//! value coder with a window coder into the "value ⊕ window" encoding used for
//! split results: big-endian timestamp, window count, windows, pane byte,
//! value.

use std::marker::PhantomData;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::window::{PaneInfo, Window, WindowedValue};

/// The ability to encode and decode values of a single type.
///
/// Decoding consumes from the front of the provided slice, advancing it past
/// the bytes read, so coders compose by concatenation.
pub trait Coder<T>: Send + Sync {
    /// Appends the encoding of `value` to `buf`.
    fn encode(&self, value: &T, buf: &mut Vec<u8>) -> Result<(), Error>;
    /// Decodes a value from the front of `buf`, advancing it.
    fn decode(&self, buf: &mut &[u8]) -> Result<T, Error>;
}

/// A [`Coder`] for any serde-serializable type, backed by bincode.
pub struct BincodeCoder<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCoder<T> {
    /// Builds the coder. Stateless; one per type is plenty.
    pub fn new() -> Self {
        BincodeCoder { _marker: PhantomData }
    }
}

impl<T> Default for BincodeCoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize + DeserializeOwned> Coder<T> for BincodeCoder<T> {
    fn encode(&self, value: &T, buf: &mut Vec<u8>) -> Result<(), Error> {
        bincode::serialize_into(&mut *buf, value).map_err(|err| Error::Coder(err.to_string()))
    }

    fn decode(&self, buf: &mut &[u8]) -> Result<T, Error> {
        let mut reader = *buf;
        let value =
            bincode::deserialize_from(&mut reader).map_err(|err| Error::Coder(err.to_string()))?;
        *buf = reader;
        Ok(value)
    }
}

/// The full input encoding of a windowed value: value ⊕ window.
///
/// This is the coder used for the element bytes of primary and residual roots
/// shipped back to the runner, and must round-trip exactly.
pub struct FullWindowedValueCoder<V, W: Window> {
    value: Box<dyn Coder<V>>,
    window: Box<dyn Coder<W>>,
}

impl<V, W: Window> FullWindowedValueCoder<V, W> {
    /// Composes a value coder and a window coder.
    pub fn new(value: Box<dyn Coder<V>>, window: Box<dyn Coder<W>>) -> Self {
        FullWindowedValueCoder { value, window }
    }
}

impl<V, W: Window> Coder<WindowedValue<V, W>> for FullWindowedValueCoder<V, W> {
    fn encode(&self, value: &WindowedValue<V, W>, buf: &mut Vec<u8>) -> Result<(), Error> {
        buf.write_i64::<BigEndian>(value.timestamp.millis())
            .expect("writes to Vec<u8> are infallible");
        let count = u32::try_from(value.windows.len())
            .map_err(|_| Error::Coder("window count exceeds u32".to_owned()))?;
        buf.write_u32::<BigEndian>(count).expect("writes to Vec<u8> are infallible");
        for window in &value.windows {
            self.window.encode(window, buf)?;
        }
        buf.push(value.pane.to_byte());
        self.value.encode(&value.value, buf)
    }

    fn decode(&self, buf: &mut &[u8]) -> Result<WindowedValue<V, W>, Error> {
        let timestamp = buf
            .read_i64::<BigEndian>()
            .map_err(|err| Error::Coder(err.to_string()))?;
        let count = buf
            .read_u32::<BigEndian>()
            .map_err(|err| Error::Coder(err.to_string()))?;
        let mut windows = Vec::with_capacity(count as usize);
        for _ in 0..count {
            windows.push(self.window.decode(buf)?);
        }
        let pane_byte = buf.read_u8().map_err(|err| Error::Coder(err.to_string()))?;
        let pane = PaneInfo::from_byte(pane_byte)?;
        let value = self.value.decode(buf)?;
        Ok(WindowedValue::new(value, crate::time::Timestamp::from_millis(timestamp), windows, pane))
    }
}
