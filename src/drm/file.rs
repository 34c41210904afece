// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! DRM File Handles
//!
//! Each open of the device gets a `DrmFile` with its own GEM handle table.
//! A handle holds one reference to its object; closing the handle drops
//! it. Handles start at 1 so that 0 can mean "none" in ioctl arguments.

use spin::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::drm::gem::{AddressSpace, BufferObject, DmaBuf};
use crate::err::{Error, Result};
use crate::types::{VAddr, PAGE_SHIFT};
use crate::{log_debug, log_error};

struct HandleTable {
    next: u32,
    objects: BTreeMap<u32, Arc<BufferObject>>,
}

/// Per-open-file state
pub struct DrmFile {
    handles: Mutex<HandleTable>,
}

impl Default for DrmFile {
    fn default() -> Self {
        Self::new()
    }
}

impl DrmFile {
    pub fn new() -> Self {
        Self {
            handles: Mutex::new(HandleTable {
                next: 1,
                objects: BTreeMap::new(),
            }),
        }
    }

    /// Publish `object` under a new handle
    pub fn handle_create(&self, object: Arc<BufferObject>) -> Result<u32> {
        let mut table = self.handles.lock();
        let handle = table.next;
        table.next = table.next.checked_add(1).ok_or(Error::NoMemory)?;
        log_debug!("syna-gem: handle {} -> object {}", handle, object.id());
        table.objects.insert(handle, object);
        Ok(handle)
    }

    /// Resolve a handle
    pub fn lookup(&self, handle: u32) -> Result<Arc<BufferObject>> {
        self.handles
            .lock()
            .objects
            .get(&handle)
            .cloned()
            .ok_or_else(|| {
                log_error!("syna-gem: unknown handle {}", handle);
                Error::NotFound
            })
    }

    /// Drop a handle's reference
    pub fn handle_delete(&self, handle: u32) -> Result {
        let removed = self.handles.lock().objects.remove(&handle);
        match removed {
            Some(object) => {
                log_debug!("syna-gem: handle {} closed (object {})", handle, object.id());
                Ok(())
            }
            None => Err(Error::NotFound),
        }
    }

    /// Number of live handles
    pub fn handle_count(&self) -> usize {
        self.handles.lock().objects.len()
    }

    /// Map the object owning the fake offset `offset` into `aspace`
    ///
    /// The offset must fall inside an object's range; anything past the
    /// object's first page becomes a nonzero page offset and is rejected.
    pub fn mmap(&self, aspace: &AddressSpace, offset: u64) -> Result<VAddr> {
        let object = {
            let table = self.handles.lock();
            table
                .objects
                .values()
                .find(|o| offset >= o.mmap_offset() && offset < o.mmap_offset() + o.size() as u64)
                .cloned()
        };

        let Some(object) = object else {
            log_error!("syna-gem: no object at mmap offset {:#x}", offset);
            return Err(Error::InvalidArgs);
        };

        let page_offset = (offset - object.mmap_offset()) >> PAGE_SHIFT;
        object.mmap_to(aspace, page_offset)
    }

    /// Export the object behind `handle` (PRIME handle to fd)
    pub fn prime_export(&self, handle: u32) -> Result<DmaBuf> {
        let object = self.lookup(handle)?;
        if object.paddr().is_none() {
            return Err(Error::BadState);
        }
        Ok(DmaBuf::export(&object))
    }

    /// Import a dma-buf (PRIME fd to handle)
    ///
    /// Re-importing an object this file already holds returns its
    /// existing handle.
    pub fn prime_import(&self, buf: &DmaBuf) -> Result<u32> {
        let existing = self
            .handles
            .lock()
            .objects
            .iter()
            .find(|(_, o)| Arc::ptr_eq(o, buf.object()))
            .map(|(h, _)| *h);

        match existing {
            Some(handle) => Ok(handle),
            None => self.handle_create(buf.object().clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::ion::{IonHeap, IonStats};
    use crate::types::PAGE_SIZE;

    fn heap() -> Arc<IonHeap> {
        Arc::new(IonHeap::new(0x5000_0000, 1 << 20))
    }

    #[test]
    fn test_handles_start_at_one() {
        let heap = heap();
        let file = DrmFile::new();
        let a = file.handle_create(Arc::new(BufferObject::create(&heap, 1, false).unwrap())).unwrap();
        let b = file.handle_create(Arc::new(BufferObject::create(&heap, 1, false).unwrap())).unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(file.handle_count(), 2);
        assert_eq!(file.lookup(3).err(), Some(Error::NotFound));
    }

    #[test]
    fn test_close_releases_object() {
        let heap = heap();
        let file = DrmFile::new();
        let h = file.handle_create(Arc::new(BufferObject::create(&heap, PAGE_SIZE, true).unwrap())).unwrap();
        file.handle_delete(h).unwrap();
        assert_eq!(heap.stats(), IonStats::default());
        assert_eq!(file.handle_delete(h), Err(Error::NotFound));
    }

    #[test]
    fn test_mmap_by_offset() {
        let heap = heap();
        let file = DrmFile::new();
        let obj = Arc::new(BufferObject::create(&heap, 2 * PAGE_SIZE, false).unwrap());
        let offset = obj.mmap_offset();
        file.handle_create(obj.clone()).unwrap();

        let aspace = AddressSpace::new();
        let vaddr = file.mmap(&aspace, offset).unwrap();
        assert_eq!(aspace.object_at(vaddr), Some(obj.id()));

        assert_eq!(file.mmap(&aspace, offset + PAGE_SIZE as u64), Err(Error::InvalidArgs));
        assert_eq!(file.mmap(&aspace, 0), Err(Error::InvalidArgs));
    }

    #[test]
    fn test_prime_round_trip_keeps_identity() {
        let heap = heap();
        let exporter = DrmFile::new();
        let importer = DrmFile::new();
        let h = exporter.handle_create(Arc::new(BufferObject::create(&heap, PAGE_SIZE, false).unwrap())).unwrap();

        let buf = exporter.prime_export(h).unwrap();
        assert_eq!(exporter.prime_import(&buf), Ok(h));

        let imported = importer.prime_import(&buf).unwrap();
        assert_eq!(importer.prime_import(&buf), Ok(imported));
        assert!(Arc::ptr_eq(&importer.lookup(imported).unwrap(), &exporter.lookup(h).unwrap()));

        // The dma-buf keeps the memory alive past both handles
        exporter.handle_delete(h).unwrap();
        importer.handle_delete(imported).unwrap();
        assert_eq!(heap.stats().allocations, 1);
        drop(buf);
        assert_eq!(heap.stats().allocations, 0);
    }
}
