use std::collections::HashMap;

use crate::gpu::{BufferId, BufferKind, DrawCall, DrawSink, GpuDevice};

#[derive(Debug)]
pub struct HeadlessBuffer {
    pub kind: BufferKind,
    pub label: String,
    pub updatable: bool,
    pub data: Vec<u8>,
}

/// A GPU device that records every operation instead of talking to hardware.
///
/// Used by tests to assert how much GPU work a frame produced: buffer
/// uploads are counted and draw calls are kept in submission order.
#[derive(Debug, Default)]
pub struct HeadlessDevice {
    next_id: u64,
    buffers: HashMap<BufferId, HeadlessBuffer>,
    pub upload_count: usize,
    pub draw_calls: Vec<DrawCall>,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self, id: BufferId) -> Option<&HeadlessBuffer> {
        self.buffers.get(&id)
    }

    pub fn buffer_size(&self, id: BufferId) -> Option<usize> {
        self.buffers.get(&id).map(|buffer| buffer.data.len())
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Total GPU traffic so far: uploads plus issued draw calls.
    pub fn work_count(&self) -> usize {
        self.upload_count + self.draw_calls.len()
    }
}

impl GpuDevice for HeadlessDevice {
    fn create_buffer(
        &mut self,
        kind: BufferKind,
        label: &str,
        contents: &[u8],
        updatable: bool,
    ) -> BufferId {
        self.next_id += 1;
        let id = BufferId(self.next_id);
        self.buffers.insert(
            id,
            HeadlessBuffer {
                kind,
                label: label.to_string(),
                updatable,
                data: contents.to_vec(),
            },
        );
        self.upload_count += 1;
        id
    }

    fn update_buffer(&mut self, buffer: BufferId, offset: u64, contents: &[u8]) {
        let Some(entry) = self.buffers.get_mut(&buffer) else {
            log::warn!("update for unknown buffer {:?}", buffer);
            return;
        };

        let offset = offset as usize;
        let end = offset + contents.len();
        if entry.data.len() < end {
            entry.data.resize(end, 0);
        }
        entry.data[offset..end].copy_from_slice(contents);
        self.upload_count += 1;
    }

    fn dispose_buffer(&mut self, buffer: BufferId) {
        self.buffers.remove(&buffer);
    }
}

impl DrawSink for HeadlessDevice {
    fn draw(&mut self, call: DrawCall) {
        self.draw_calls.push(call);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_update_tracks_uploads() {
        let mut device = HeadlessDevice::new();
        let id = device.create_buffer(BufferKind::Vertex, "positions", &[0; 12], true);
        device.update_buffer(id, 4, &[1, 2, 3, 4]);

        assert_eq!(device.upload_count, 2);
        assert_eq!(device.buffer(id).unwrap().data[4..8], [1, 2, 3, 4]);
    }

    #[test]
    fn dispose_releases_the_buffer() {
        let mut device = HeadlessDevice::new();
        let id = device.create_buffer(BufferKind::Index, "indices", &[0; 6], false);
        assert_eq!(device.live_buffer_count(), 1);

        device.dispose_buffer(id);
        assert_eq!(device.live_buffer_count(), 0);
        assert!(device.buffer(id).is_none());
    }
}
