//! Generation-checked resource arena
//!
//! Every native resource the bridge creates lives in a [`Registry`] slot and is
//! named by a [`Handle`]. A handle packs the slot index, the slot's generation
//! and a resource-kind tag into one `u64`, so it can cross a language boundary
//! as a plain integer and still be validated on the way back in:
//!
//! ```text
//!  63      56 55                 32 31                    0
//! +----------+---------------------+-----------------------+
//! |   kind   |     generation      |       slot index      |
//! +----------+---------------------+-----------------------+
//! ```
//!
//! Releasing a resource bumps its slot's generation, so the old handle is
//! rejected even after the slot is reused.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{JitError, Result};

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const KIND_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;

/// Resource kinds that can be named by a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceKind {
    /// Compiled translation unit
    Program = 1,
    /// Named kernel of a program
    Kernel = 2,
    /// Kernel bound to template arguments
    Instantiation = 3,
    /// Instantiation bound to a launch shape
    Launcher = 4,
    /// Linear device allocation
    DeviceBuffer = 5,
    /// Page-locked host allocation
    PinnedBuffer = 6,
    /// 3-D pitched device allocation
    PitchedBuffer = 7,
    /// 3-D device array
    DeviceArray = 8,
    /// Texture object
    Texture = 9,
}

impl ResourceKind {
    /// Lower-case name used in error messages
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Program => "program",
            Self::Kernel => "kernel",
            Self::Instantiation => "instantiation",
            Self::Launcher => "launcher",
            Self::DeviceBuffer => "device buffer",
            Self::PinnedBuffer => "pinned buffer",
            Self::PitchedBuffer => "pitched buffer",
            Self::DeviceArray => "device array",
            Self::Texture => "texture",
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Program,
            2 => Self::Kernel,
            3 => Self::Instantiation,
            4 => Self::Launcher,
            5 => Self::DeviceBuffer,
            6 => Self::PinnedBuffer,
            7 => Self::PitchedBuffer,
            8 => Self::DeviceArray,
            9 => Self::Texture,
            _ => return None,
        })
    }
}

/// A type that can be stored in a [`Registry`]
pub trait Resource {
    /// Kind tag written into every handle for this type
    const KIND: ResourceKind;
}

/// Opaque, typed reference to a registry slot
pub struct Handle<T> {
    raw: u64,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls so `T` need not be Copy/Clone/Eq
impl<T> Copy for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Handle<T> {}

impl<T> std::hash::Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: Resource> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Handle<{}>(#{} gen {})",
            T::KIND.name(),
            self.index(),
            self.generation()
        )
    }
}

impl<T> Handle<T> {
    fn pack(kind: ResourceKind, index: u32, generation: u32) -> Self {
        let raw = (u64::from(kind as u8) << KIND_SHIFT)
            | (u64::from(generation & GENERATION_MASK) << INDEX_BITS)
            | u64::from(index);
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Reinterpret an integer received from the caller
    ///
    /// Never fails; validation happens when the handle is decoded by a registry.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Integer form handed to the caller
    #[must_use]
    pub const fn to_raw(self) -> u64 {
        self.raw
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn index(self) -> u32 {
        self.raw as u32
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn generation(self) -> u32 {
        (self.raw >> INDEX_BITS) as u32 & GENERATION_MASK
    }

    #[allow(clippy::cast_possible_truncation)]
    const fn tag(self) -> u8 {
        (self.raw >> KIND_SHIFT) as u8
    }

    /// Kind encoded in the handle, if it names a known kind
    #[must_use]
    pub fn kind(self) -> Option<ResourceKind> {
        ResourceKind::from_tag(self.tag())
    }
}

impl<T> From<Handle<T>> for u64 {
    fn from(handle: Handle<T>) -> Self {
        handle.raw
    }
}

enum Slot<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// Arena of resources of one kind
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T: Resource> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> Registry<T> {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of live resources
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no resource is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Take ownership of `value` and return its handle
    #[allow(clippy::cast_possible_truncation)]
    pub fn insert(&mut self, value: T) -> Handle<T> {
        self.len += 1;
        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            let (generation, next_free) = match slot {
                Slot::Vacant {
                    generation,
                    next_free,
                } => (*generation, *next_free),
                Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
            };
            *slot = Slot::Occupied { generation, value };
            self.free_head = next_free;
            return Handle::pack(T::KIND, index, generation);
        }

        let index = self.slots.len() as u32;
        // Generation starts at 1 so no handle ever encodes as 0
        self.slots.push(Slot::Occupied {
            generation: 1,
            value,
        });
        Handle::pack(T::KIND, index, 1)
    }

    fn check(&self, handle: Handle<T>) -> Result<usize> {
        let invalid = |reason| JitError::InvalidHandle {
            handle: handle.raw,
            expected: T::KIND.name(),
            reason,
        };

        if handle.tag() != T::KIND as u8 {
            return Err(invalid("handle names a different resource kind"));
        }
        let index = handle.index() as usize;
        match self.slots.get(index) {
            None => Err(invalid("no such slot")),
            Some(Slot::Vacant { .. }) => Err(invalid("resource was released")),
            Some(Slot::Occupied { generation, .. }) if *generation != handle.generation() => {
                Err(invalid("stale generation"))
            }
            Some(Slot::Occupied { .. }) => Ok(index),
        }
    }

    /// Borrow the resource named by `handle`
    pub fn get(&self, handle: Handle<T>) -> Result<&T> {
        let index = self.check(handle)?;
        match &self.slots[index] {
            Slot::Occupied { value, .. } => Ok(value),
            Slot::Vacant { .. } => unreachable!("checked slot is occupied"),
        }
    }

    /// Mutably borrow the resource named by `handle`
    pub fn get_mut(&mut self, handle: Handle<T>) -> Result<&mut T> {
        let index = self.check(handle)?;
        match &mut self.slots[index] {
            Slot::Occupied { value, .. } => Ok(value),
            Slot::Vacant { .. } => unreachable!("checked slot is occupied"),
        }
    }

    /// Whether `handle` names a live resource of this registry
    #[must_use]
    pub fn contains(&self, handle: Handle<T>) -> bool {
        self.check(handle).is_ok()
    }

    /// Release the resource, returning ownership to the caller
    #[allow(clippy::cast_possible_truncation)]
    pub fn remove(&mut self, handle: Handle<T>) -> Result<T> {
        let index = self.check(handle)?;
        let next_generation = match &self.slots[index] {
            Slot::Occupied { generation, .. } => next_generation(*generation),
            Slot::Vacant { .. } => unreachable!("checked slot is occupied"),
        };
        let old = std::mem::replace(
            &mut self.slots[index],
            Slot::Vacant {
                generation: next_generation,
                next_free: self.free_head,
            },
        );
        self.free_head = Some(index as u32);
        self.len -= 1;
        match old {
            Slot::Occupied { value, .. } => Ok(value),
            Slot::Vacant { .. } => unreachable!("checked slot is occupied"),
        }
    }

    /// Iterate over live resources with their handles
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                #[allow(clippy::cast_possible_truncation)]
                Slot::Occupied { generation, value } => {
                    Some((Handle::pack(T::KIND, index as u32, *generation), value))
                }
                Slot::Vacant { .. } => None,
            })
    }

    /// Handles of every live resource
    #[must_use]
    pub fn handles(&self) -> Vec<Handle<T>> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    /// Release every resource, invalidating all outstanding handles
    pub fn drain(&mut self) -> Vec<T> {
        self.handles()
            .into_iter()
            .filter_map(|handle| self.remove(handle).ok())
            .collect()
    }
}

fn next_generation(generation: u32) -> u32 {
    // Skip 0 on wrap-around so a recycled slot never encodes as a zero handle
    match (generation + 1) & GENERATION_MASK {
        0 => 1,
        g => g,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Widget(u32);

    impl Resource for Widget {
        const KIND: ResourceKind = ResourceKind::DeviceBuffer;
    }

    struct Gadget;

    impl Resource for Gadget {
        const KIND: ResourceKind = ResourceKind::Program;
    }

    #[test]
    fn test_insert_get_remove() {
        let mut reg = Registry::new();
        let h = reg.insert(Widget(7));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(h).unwrap(), &Widget(7));
        reg.get_mut(h).unwrap().0 = 8;
        assert_eq!(reg.remove(h).unwrap(), Widget(8));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_handle_is_never_zero() {
        let mut reg = Registry::new();
        let h = reg.insert(Widget(0));
        assert_ne!(h.to_raw(), 0);
        assert_eq!(h.kind(), Some(ResourceKind::DeviceBuffer));
    }

    #[test]
    fn test_stale_handle_rejected_after_reuse() {
        let mut reg = Registry::new();
        let old = reg.insert(Widget(1));
        reg.remove(old).unwrap();
        let new = reg.insert(Widget(2));

        // Same slot, different generation
        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);

        let err = reg.get(old).unwrap_err();
        assert!(matches!(
            err,
            JitError::InvalidHandle {
                reason: "stale generation",
                ..
            }
        ));
        assert_eq!(reg.get(new).unwrap(), &Widget(2));
    }

    #[test]
    fn test_released_handle_rejected() {
        let mut reg = Registry::new();
        let h = reg.insert(Widget(1));
        reg.remove(h).unwrap();
        assert!(reg.get(h).is_err());
        assert!(reg.remove(h).is_err());
    }

    #[test]
    fn test_foreign_kind_rejected() {
        let mut programs: Registry<Gadget> = Registry::new();
        let p = programs.insert(Gadget);

        let widgets: Registry<Widget> = Registry::new();
        let forged: Handle<Widget> = Handle::from_raw(p.to_raw());
        let err = widgets.get(forged).unwrap_err();
        assert!(matches!(
            err,
            JitError::InvalidHandle {
                expected: "device buffer",
                ..
            }
        ));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let reg: Registry<Widget> = Registry::new();
        let h = Handle::<Widget>::pack(ResourceKind::DeviceBuffer, 42, 1);
        assert!(!reg.contains(h));
    }

    #[test]
    fn test_drain_invalidates_everything() {
        let mut reg = Registry::new();
        let a = reg.insert(Widget(1));
        let b = reg.insert(Widget(2));
        let drained = reg.drain();
        assert_eq!(drained.len(), 2);
        assert!(!reg.contains(a));
        assert!(!reg.contains(b));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_iter_yields_live_only() {
        let mut reg = Registry::new();
        let a = reg.insert(Widget(1));
        let _b = reg.insert(Widget(2));
        reg.remove(a).unwrap();
        let live: Vec<u32> = reg.iter().map(|(_, w)| w.0).collect();
        assert_eq!(live, vec![2]);
    }

    #[test]
    fn test_generation_wraps_to_one() {
        assert_eq!(next_generation(GENERATION_MASK), 1);
        assert_eq!(next_generation(1), 2);
    }
}
