//! Per-element render rectangles.
//!
//! Each element that has been laid out owns one 48-byte record in the
//! rect arena, carrying the frame geometry, inline-content metrics,
//! overflow amounts and a few renderer scratch fields. The accessor
//! reads the record once and writes it back only if modified.

use crate::serial::{SerialReader, SerialWriter};

pub const RECT_RECORD_SIZE: u32 = 48;

/// Usable overflows are clamped to a byte; they measure glyph overhang
/// into margins, which never reaches that bound in practice.
const USABLE_OVERFLOW_MAX: i32 = i8::MAX as i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RenderRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub inner_x: i16,
    pub inner_y: i16,
    pub inner_width: i16,
    pub top_overflow: i16,
    pub bottom_overflow: i16,
    pub usable_left_overflow: i8,
    pub usable_right_overflow: i8,
    pub baseline: i16,
    pub flags: u16,
    pub listprop_node_idx: u16,
    pub lang_node_idx: u16,
    pub extra0: i16,
    pub extra1: i16,
    pub extra2: i16,
    pub extra3: i16,
    pub extra4: i16,
    pub extra5: i16,
}

impl RenderRect {
    pub fn encode(&self) -> [u8; RECT_RECORD_SIZE as usize] {
        let mut w = SerialWriter::with_capacity(RECT_RECORD_SIZE as usize);
        w.put_i32(self.x);
        w.put_i32(self.y);
        w.put_i32(self.width);
        w.put_i32(self.height);
        w.put_u16(self.inner_x as u16);
        w.put_u16(self.inner_y as u16);
        w.put_u16(self.inner_width as u16);
        w.put_u16(self.top_overflow as u16);
        w.put_u16(self.bottom_overflow as u16);
        w.put_u8(self.usable_left_overflow as u8);
        w.put_u8(self.usable_right_overflow as u8);
        w.put_u16(self.baseline as u16);
        w.put_u16(self.flags);
        w.put_u16(self.listprop_node_idx);
        w.put_u16(self.lang_node_idx);
        w.put_u16(self.extra0 as u16);
        w.put_u16(self.extra1 as u16);
        w.put_u16(self.extra2 as u16);
        w.put_u16(self.extra3 as u16);
        w.put_u16(self.extra4 as u16);
        w.put_u16(self.extra5 as u16);
        let v = w.into_vec();
        let mut out = [0u8; RECT_RECORD_SIZE as usize];
        out.copy_from_slice(&v);
        out
    }

    pub fn decode(bytes: &[u8]) -> Self {
        let mut r = SerialReader::new(bytes);
        // The record is fixed-size; reads can't fail on a 48-byte input.
        let mut rect = RenderRect::default();
        rect.x = r.get_i32().unwrap_or(0);
        rect.y = r.get_i32().unwrap_or(0);
        rect.width = r.get_i32().unwrap_or(0);
        rect.height = r.get_i32().unwrap_or(0);
        rect.inner_x = r.get_u16().unwrap_or(0) as i16;
        rect.inner_y = r.get_u16().unwrap_or(0) as i16;
        rect.inner_width = r.get_u16().unwrap_or(0) as i16;
        rect.top_overflow = r.get_u16().unwrap_or(0) as i16;
        rect.bottom_overflow = r.get_u16().unwrap_or(0) as i16;
        rect.usable_left_overflow = r.get_u8().unwrap_or(0) as i8;
        rect.usable_right_overflow = r.get_u8().unwrap_or(0) as i8;
        rect.baseline = r.get_u16().unwrap_or(0) as i16;
        rect.flags = r.get_u16().unwrap_or(0);
        rect.listprop_node_idx = r.get_u16().unwrap_or(0);
        rect.lang_node_idx = r.get_u16().unwrap_or(0);
        rect.extra0 = r.get_u16().unwrap_or(0) as i16;
        rect.extra1 = r.get_u16().unwrap_or(0) as i16;
        rect.extra2 = r.get_u16().unwrap_or(0) as i16;
        rect.extra3 = r.get_u16().unwrap_or(0) as i16;
        rect.extra4 = r.get_u16().unwrap_or(0) as i16;
        rect.extra5 = r.get_u16().unwrap_or(0) as i16;
        rect
    }

    pub fn set_usable_overflows(&mut self, left: i32, right: i32) {
        self.usable_left_overflow = left.clamp(0, USABLE_OVERFLOW_MAX) as i8;
        self.usable_right_overflow = right.clamp(0, USABLE_OVERFLOW_MAX) as i8;
    }
}
