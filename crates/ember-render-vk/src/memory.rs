// SPDX-License-Identifier: CEPL-1.0
use crate::error::{RenderError, Result, StageExt};
use ash::vk;
use tracing::{trace, warn};

/// Smallest memory type index allowed by `allowed` whose flags contain `required`.
pub fn find_memory_type_index(
    props: &vk::PhysicalDeviceMemoryProperties,
    allowed: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = props.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    (0..count)
        .find(|&i| {
            (allowed & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(required)
        })
        .ok_or(RenderError::NoSuitableMemoryType { allowed, required })
}

/// Device handle plus the memory layout of its physical device.
#[derive(Clone)]
pub struct Allocator {
    device: ash::Device,
    memory_props: vk::PhysicalDeviceMemoryProperties,
}

/// Queue and pool used for blocking one-shot transfers.
#[derive(Clone, Copy, Debug)]
pub struct TransferContext {
    pub queue: vk::Queue,
    pub pool: vk::CommandPool,
}

impl Allocator {
    pub unsafe fn new(
        instance: &ash::Instance,
        phys: vk::PhysicalDevice,
        device: &ash::Device,
    ) -> Self {
        Allocator {
            device: device.clone(),
            memory_props: instance.get_physical_device_memory_properties(phys),
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Buffer with its own allocation bound at offset 0.
    pub unsafe fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let d = &self.device;
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = d.create_buffer(&bci, None).stage("create buffer")?;
        // Owns the buffer from here on so every early return releases it.
        let mut out = GpuBuffer {
            device: d.clone(),
            buffer,
            memory: vk::DeviceMemory::null(),
            size,
        };

        let req = d.get_buffer_memory_requirements(buffer);
        let memory_type_index =
            find_memory_type_index(&self.memory_props, req.memory_type_bits, properties)?;
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        out.memory = d.allocate_memory(&mai, None).stage("allocate buffer memory")?;
        d.bind_buffer_memory(buffer, out.memory, 0)
            .stage("bind buffer memory")?;
        trace!(
            "buffer: {size} bytes, usage {usage:?}, memory type {memory_type_index} \
             ({properties:?})"
        );
        Ok(out)
    }

    /// Host-visible, host-coherent buffer: writable through [`GpuBuffer::write`].
    pub unsafe fn create_host_visible(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        self.create_buffer(
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local buffer filled through a temporary staging buffer.
    ///
    /// Blocks until the copy has finished on `transfer.queue`.
    pub unsafe fn create_device_local_with_data(
        &self,
        transfer: TransferContext,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let size = data.len() as vk::DeviceSize;
        let staging = self.create_host_visible(size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(data)?;

        let dst = self.create_buffer(
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        self.copy_buffer(transfer, staging.handle(), dst.handle(), size)?;
        Ok(dst)
    }

    /// One-shot copy: record, submit, wait for queue idle, free.
    pub unsafe fn copy_buffer(
        &self,
        transfer: TransferContext,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) -> Result<()> {
        let d = &self.device;
        let ai = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: transfer.pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        let cmd = d
            .allocate_command_buffers(&ai)
            .stage("allocate transfer command buffer")?[0];

        let mut progress = TransferProgress::Recording;
        let result = (|| -> Result<()> {
            let bi = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            d.begin_command_buffer(cmd, &bi)
                .stage("begin transfer command buffer")?;
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            d.cmd_copy_buffer(cmd, src, dst, std::slice::from_ref(&region));
            d.end_command_buffer(cmd)
                .stage("end transfer command buffer")?;

            let si = vk::SubmitInfo {
                s_type: vk::StructureType::SUBMIT_INFO,
                command_buffer_count: 1,
                p_command_buffers: &cmd,
                ..Default::default()
            };
            d.queue_submit(transfer.queue, std::slice::from_ref(&si), vk::Fence::null())
                .stage("submit transfer")?;
            progress = TransferProgress::Submitted;
            d.queue_wait_idle(transfer.queue).stage("wait for transfer")?;
            progress = TransferProgress::Finished;
            Ok(())
        })();

        if progress.may_free() {
            d.free_command_buffers(transfer.pool, std::slice::from_ref(&cmd));
        } else {
            // Still pending; the pool reclaims it when destroyed.
            warn!("transfer queue did not go idle, keeping its command buffer");
        }
        result
    }
}

/// How far a one-shot copy got.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TransferProgress {
    Recording,
    Submitted,
    Finished,
}

impl TransferProgress {
    /// A submitted command buffer may be executing until the queue is idle.
    fn may_free(self) -> bool {
        self != TransferProgress::Submitted
    }
}

/// A buffer and the allocation bound to it. Released on drop.
pub struct GpuBuffer {
    device: ash::Device,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
}

impl GpuBuffer {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Map, copy, unmap. Only valid for host-visible, host-coherent memory.
    pub unsafe fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as vk::DeviceSize > self.size {
            return Err(RenderError::failed(
                "write buffer",
                vk::Result::ERROR_MEMORY_MAP_FAILED,
            ));
        }
        let len = bytes.len() as vk::DeviceSize;
        let ptr = self
            .device
            .map_memory(self.memory, 0, len, vk::MemoryMapFlags::empty())
            .stage("map buffer memory")?;
        let dst = std::slice::from_raw_parts_mut(ptr.cast::<u8>(), bytes.len());
        dst.copy_from_slice(bytes);
        self.device.unmap_memory(self.memory);
        Ok(())
    }

    /// Releases the buffer and its memory now. Later calls are no-ops.
    pub unsafe fn destroy(&mut self) {
        if self.buffer != vk::Buffer::null() {
            self.device.destroy_buffer(self.buffer, None);
            self.buffer = vk::Buffer::null();
        }
        if self.memory != vk::DeviceMemory::null() {
            self.device.free_memory(self.memory, None);
            self.memory = vk::DeviceMemory::null();
        }
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe { self.destroy() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vk::MemoryPropertyFlags as M;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut p = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (i, &flags) in types.iter().enumerate() {
            p.memory_types[i] = vk::MemoryType {
                property_flags: flags,
                heap_index: 0,
            };
        }
        p
    }

    #[test]
    fn copy_buffer_is_freed_only_when_not_pending() {
        assert!(TransferProgress::Recording.may_free());
        assert!(!TransferProgress::Submitted.may_free());
        assert!(TransferProgress::Finished.may_free());
    }

    #[test]
    fn picks_first_superset_type() {
        let p = props(&[
            M::DEVICE_LOCAL,
            M::HOST_VISIBLE,
            M::HOST_VISIBLE | M::HOST_COHERENT,
            M::HOST_VISIBLE | M::HOST_COHERENT | M::HOST_CACHED,
        ]);
        let idx = find_memory_type_index(&p, 0b1111, M::HOST_VISIBLE | M::HOST_COHERENT);
        assert_eq!(idx.unwrap(), 2);
    }

    #[test]
    fn respects_allowed_bits() {
        let p = props(&[M::DEVICE_LOCAL, M::DEVICE_LOCAL, M::DEVICE_LOCAL]);
        assert_eq!(find_memory_type_index(&p, 0b100, M::DEVICE_LOCAL).unwrap(), 2);
        assert_eq!(find_memory_type_index(&p, 0b110, M::DEVICE_LOCAL).unwrap(), 1);
    }

    #[test]
    fn empty_requirement_matches_any_allowed_type() {
        let p = props(&[M::DEVICE_LOCAL, M::HOST_VISIBLE]);
        assert_eq!(find_memory_type_index(&p, 0b10, M::empty()).unwrap(), 1);
    }

    #[test]
    fn no_match_is_an_error_not_index_zero() {
        let p = props(&[M::DEVICE_LOCAL, M::HOST_VISIBLE]);
        let err = find_memory_type_index(&p, 0b11, M::HOST_VISIBLE | M::HOST_COHERENT)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::NoSuitableMemoryType { allowed: 0b11, .. }
        ));

        // Bits beyond memory_type_count never match.
        assert!(find_memory_type_index(&p, 0b100, M::empty()).is_err());
    }
}
