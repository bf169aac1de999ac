//! Growable world-matrix buffer for hardware instancing.
//!
//! Logically sized to the visible instance count (plus the mesh's own draw)
//! each dispatch, physically sized to a doubling capacity that never
//! shrinks. Within capacity, matrices are overwritten in place and only the
//! used byte range is re-uploaded; growth allocates a new GPU buffer, whose
//! four matrix-row vertex streams get rebound on the next draw that names
//! it.

use glam::Mat4;

use crate::gpu::{BufferId, BufferKind, GpuDevice};

pub const INITIAL_MATRIX_CAPACITY: usize = 32;

const FLOATS_PER_MATRIX: usize = 16;

#[derive(Debug, Default)]
pub struct InstanceTransformBuffer {
    data: Vec<f32>,
    used_matrices: usize,
    capacity_matrices: usize,
    buffer: Option<BufferId>,
}

impl InstanceTransformBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.capacity_matrices
    }

    pub fn used_matrices(&self) -> usize {
        self.used_matrices
    }

    pub fn buffer(&self) -> Option<BufferId> {
        self.buffer
    }

    /// Make room for `required` matrices and reset the write cursor.
    ///
    /// Capacity doubles until sufficient; it never shrinks. The GPU buffer
    /// is only recreated when capacity actually grew.
    pub fn ensure_capacity(&mut self, required: usize, device: &mut dyn GpuDevice) {
        self.used_matrices = 0;
        if required == 0 {
            return;
        }

        let mut grew = false;
        if self.capacity_matrices == 0 {
            self.capacity_matrices = INITIAL_MATRIX_CAPACITY;
            grew = true;
        }
        while self.capacity_matrices < required {
            self.capacity_matrices *= 2;
            grew = true;
        }

        if grew || self.buffer.is_none() {
            if let Some(old) = self.buffer.take() {
                device.dispose_buffer(old);
            }
            self.data.resize(self.capacity_matrices * FLOATS_PER_MATRIX, 0.0);
            self.buffer = Some(device.create_buffer(
                BufferKind::Instance,
                "instance_matrices",
                bytemuck::cast_slice(&self.data),
                true,
            ));
        }
    }

    /// The mesh's own matrix goes first, ahead of any instances.
    pub fn write_self(&mut self, world: &Mat4) {
        self.push(world);
    }

    pub fn write_instance(&mut self, world: &Mat4) {
        self.push(world);
    }

    fn push(&mut self, world: &Mat4) {
        let offset = self.used_matrices * FLOATS_PER_MATRIX;
        if offset + FLOATS_PER_MATRIX > self.data.len() {
            log::warn!("instance matrix written past reserved capacity; dropped");
            return;
        }
        self.data[offset..offset + FLOATS_PER_MATRIX].copy_from_slice(&world.to_cols_array());
        self.used_matrices += 1;
    }

    /// Upload the written range. Untouched capacity past the cursor is not
    /// transferred.
    pub fn commit(&mut self, device: &mut dyn GpuDevice) {
        let Some(buffer) = self.buffer else {
            return;
        };
        if self.used_matrices == 0 {
            return;
        }
        let used = &self.data[..self.used_matrices * FLOATS_PER_MATRIX];
        device.update_buffer(buffer, 0, bytemuck::cast_slice(used));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::HeadlessDevice;

    #[test]
    fn capacity_doubles_and_never_shrinks() {
        let mut device = HeadlessDevice::new();
        let mut buffer = InstanceTransformBuffer::new();

        let mut previous = 0;
        for (required, expected) in [(1, 32), (33, 64), (65, 128), (10000, 16384)] {
            buffer.ensure_capacity(required, &mut device);
            assert_eq!(buffer.capacity(), expected);
            assert!(buffer.capacity() >= previous);
            assert_eq!(buffer.capacity() % INITIAL_MATRIX_CAPACITY, 0);
            assert!(buffer.capacity().is_power_of_two());
            previous = buffer.capacity();
        }

        buffer.ensure_capacity(1, &mut device);
        assert_eq!(buffer.capacity(), 16384);
    }

    #[test]
    fn within_capacity_reuses_the_same_buffer() {
        let mut device = HeadlessDevice::new();
        let mut buffer = InstanceTransformBuffer::new();

        buffer.ensure_capacity(10, &mut device);
        let first = buffer.buffer().unwrap();

        buffer.ensure_capacity(20, &mut device);
        assert_eq!(buffer.buffer().unwrap(), first);

        buffer.ensure_capacity(100, &mut device);
        assert_ne!(buffer.buffer().unwrap(), first);
    }

    #[test]
    fn commit_uploads_only_the_used_range() {
        let mut device = HeadlessDevice::new();
        let mut buffer = InstanceTransformBuffer::new();

        buffer.ensure_capacity(3, &mut device);
        let uploads_after_alloc = device.upload_count;

        buffer.write_self(&Mat4::IDENTITY);
        buffer.write_instance(&Mat4::from_translation(glam::Vec3::X));
        buffer.commit(&mut device);

        assert_eq!(device.upload_count, uploads_after_alloc + 1);
        assert_eq!(buffer.used_matrices(), 2);
    }

    #[test]
    fn writes_past_reserved_capacity_are_dropped() {
        let mut device = HeadlessDevice::new();
        let mut buffer = InstanceTransformBuffer::new();

        buffer.ensure_capacity(1, &mut device);
        for _ in 0..40 {
            buffer.write_instance(&Mat4::IDENTITY);
        }
        assert_eq!(buffer.used_matrices(), 32);
    }
}
