//! An in-process [`DevicePlugin`] backed by a `Vec<u8>` arena, standing in
//! for a real accelerator in this crate's own test suite (the Non-goals
//! explicitly exclude shipping a real GPU/vendor backend).

use std::sync::Mutex;

use offload_abi::{DeviceCapabilities, OffloadImageTable};
use offload_plugin::{AddrPair, DevicePlugin, PluginError};

/// Virtual address space base; addresses returned to callers are never
/// dereferenced by this crate directly, only handed back to the plugin, so
/// any stable, collision-free scheme works.
const DEVICE_BASE: u64 = 0x7000_0000_0000;
const DEVICE_STRIDE: u64 = 0x1_0000_0000;

struct DeviceMemory {
    buf: Vec<u8>,
}

/// A device plugin whose "device" is a growable byte buffer per target id.
/// `alloc` is a simple bump allocator — `free` is a no-op, which is fine for
/// exercising the map/unmap engines' bookkeeping without needing real
/// reclamation.
pub struct MockPlugin {
    capabilities: DeviceCapabilities,
    devices: Mutex<Vec<DeviceMemory>>,
}

impl MockPlugin {
    pub fn new(num_devices: u32) -> Self {
        Self {
            capabilities: DeviceCapabilities::NONE,
            devices: Mutex::new((0..num_devices).map(|_| DeviceMemory { buf: Vec::new() }).collect()),
        }
    }

    pub fn with_capabilities(mut self, caps: DeviceCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    fn offset_to_addr(target_id: i32, offset: usize) -> u64 {
        DEVICE_BASE + target_id as u64 * DEVICE_STRIDE + offset as u64
    }

    fn addr_to_offset(target_id: i32, addr: u64) -> usize {
        (addr - (DEVICE_BASE + target_id as u64 * DEVICE_STRIDE)) as usize
    }

    fn bump(buf: &mut Vec<u8>, len: usize) -> usize {
        let start = buf.len();
        buf.resize(start + len, 0);
        start
    }
}

impl DevicePlugin for MockPlugin {
    fn name(&self) -> &str {
        "mock"
    }

    fn version(&self) -> u32 {
        1
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn device_type(&self) -> &str {
        "mock"
    }

    fn num_devices(&self) -> u32 {
        self.devices.lock().expect("mock plugin poisoned").len() as u32
    }

    fn init_device(&self, _target_id: i32) -> Result<(), PluginError> {
        Ok(())
    }

    fn fini_device(&self, _target_id: i32) -> Result<(), PluginError> {
        Ok(())
    }

    fn load_image(&self, target_id: i32, _version: u32, table: &OffloadImageTable) -> Result<Vec<AddrPair>, PluginError> {
        let mut devices = self.devices.lock().expect("mock plugin poisoned");
        let dev = &mut devices[target_id as usize];
        let mut pairs = Vec::with_capacity(table.num_entries());
        for _ in 0..table.num_funcs() {
            let start = Self::bump(&mut dev.buf, 8);
            pairs.push(AddrPair { start: Self::offset_to_addr(target_id, start), end: Self::offset_to_addr(target_id, start + 8) });
        }
        for var in &table.variables {
            let len = var.size as usize;
            let start = Self::bump(&mut dev.buf, len);
            pairs.push(AddrPair { start: Self::offset_to_addr(target_id, start), end: Self::offset_to_addr(target_id, start + len) });
        }
        Ok(pairs)
    }

    fn unload_image(&self, _target_id: i32, _version: u32) -> Result<(), PluginError> {
        Ok(())
    }

    fn alloc(&self, target_id: i32, size: u64) -> Result<u64, PluginError> {
        let mut devices = self.devices.lock().expect("mock plugin poisoned");
        let dev = &mut devices[target_id as usize];
        let start = Self::bump(&mut dev.buf, size as usize);
        Ok(Self::offset_to_addr(target_id, start))
    }

    fn free(&self, _target_id: i32, _addr: u64) -> Result<(), PluginError> {
        Ok(())
    }

    fn host_to_dev(&self, target_id: i32, dst: u64, src: &[u8]) -> Result<(), PluginError> {
        let mut devices = self.devices.lock().expect("mock plugin poisoned");
        let dev = &mut devices[target_id as usize];
        let off = Self::addr_to_offset(target_id, dst);
        dev.buf[off..off + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn dev_to_host(&self, target_id: i32, dst: &mut [u8], src: u64) -> Result<(), PluginError> {
        let devices = self.devices.lock().expect("mock plugin poisoned");
        let dev = &devices[target_id as usize];
        let off = Self::addr_to_offset(target_id, src);
        dst.copy_from_slice(&dev.buf[off..off + dst.len()]);
        Ok(())
    }

    fn dev_to_dev(&self, target_id: i32, dst: u64, src: u64, len: u64) -> Result<(), PluginError> {
        let mut devices = self.devices.lock().expect("mock plugin poisoned");
        let dev = &mut devices[target_id as usize];
        let src_off = Self::addr_to_offset(target_id, src);
        let dst_off = Self::addr_to_offset(target_id, dst);
        let len = len as usize;
        dev.buf.copy_within(src_off..src_off + len, dst_off);
        Ok(())
    }

    fn run(&self, _target_id: i32, _fn_addr: u64, _args_addr: u64) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_then_roundtrip() {
        let plugin = MockPlugin::new(1);
        let addr = plugin.alloc(0, 4).unwrap();
        plugin.host_to_dev(0, addr, &[1, 2, 3, 4]).unwrap();
        let mut out = [0u8; 4];
        plugin.dev_to_host(0, &mut out, addr).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn load_image_returns_one_pair_per_entry() {
        let plugin = MockPlugin::new(1);
        let table = OffloadImageTable {
            functions: vec![0x1000, 0x1008],
            variables: vec![offload_abi::VarEntry { host_addr: 0x2000, size: 16 }],
        };
        let pairs = plugin.load_image(0, 1, &table).unwrap();
        assert_eq!(pairs.len(), 3);
    }
}
