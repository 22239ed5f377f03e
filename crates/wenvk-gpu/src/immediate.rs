//! Blocking one-shot submissions for setup work.

use crate::command::{begin_one_time, end_command_buffer, submit2, CommandPool};
use crate::context::GpuContext;
use crate::error::Result;
use crate::sync::{create_fence, reset_fence, wait_for_fence};
use ash::vk;

struct Live {
    pool: CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
}

/// Records a closure into a dedicated command buffer, submits it and waits for completion.
pub struct ImmediateCommandQueue {
    live: Option<Live>,
    name: String,
}

impl ImmediateCommandQueue {
    pub fn new(gpu: &GpuContext, name: &str) -> Result<Self> {
        let device = gpu.device();
        let live = unsafe {
            let pool = CommandPool::new(
                device,
                gpu.graphics_queue_family(),
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )?;
            let command_buffer = pool.allocate_command_buffer(device)?;
            let fence = create_fence(device, false)?;
            Live {
                pool,
                command_buffer,
                fence,
            }
        };

        gpu.set_object_name(live.pool.handle(), name);
        gpu.set_object_name(live.command_buffer, name);
        gpu.set_object_name(live.fence, name);

        Ok(Self {
            live: Some(live),
            name: name.to_string(),
        })
    }

    fn live(&self) -> &Live {
        match &self.live {
            Some(live) => live,
            None => panic!("immediate queue '{}' used after cleanup", self.name),
        }
    }

    /// Record `record` and block until the GPU has executed it.
    ///
    /// The wait is bounded by the context's fence timeout.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn submit<F>(&self, gpu: &GpuContext, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let live = self.live();
        let device = gpu.device();
        let cmd = live.command_buffer;

        unsafe {
            reset_fence(device, live.fence)?;
            begin_one_time(device, cmd)?;
        }

        record(device, cmd);

        unsafe {
            end_command_buffer(device, cmd)?;
            submit2(device, gpu.graphics_queue(), cmd, None, None, live.fence)?;
            wait_for_fence(device, live.fence, gpu.fence_timeout_ns(), "immediate submit")?;
        }
        Ok(())
    }

    /// Destroy the pool and fence.
    ///
    /// # Panics
    /// If called twice.
    pub fn cleanup(&mut self, device: &ash::Device) {
        let Some(live) = self.live.take() else {
            panic!("immediate queue '{}' cleaned up twice", self.name);
        };
        unsafe {
            device.destroy_fence(live.fence, None);
            live.pool.destroy(device);
        }
    }
}

impl Drop for ImmediateCommandQueue {
    fn drop(&mut self) {
        if self.live.is_some() {
            tracing::warn!("Immediate queue '{}' dropped without cleanup", self.name);
        }
    }
}
