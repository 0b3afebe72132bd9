use std::ops;
use std::fmt;
use std::fmt::Formatter;

/// A raw address inside one memory pool.
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy, Default)]
pub struct Address {
    pub value: u64,
}

impl Address {
    pub const NULL: Address = Address { value: 0 };

    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self { value: ptr as usize as u64 }
    }

    pub fn is_null(&self) -> bool {
        self.value == 0
    }

    pub fn offset(&self, by: u64) -> Self {
        Self { value: self.value + by }
    }

    pub fn as_u64(&self) -> u64 {
        self.value
    }

    pub fn as_ptr<T>(&self) -> *const T {
        self.value as usize as *const T
    }
}

impl ops::Sub<Address> for Address {
    type Output = u64;

    fn sub(self, rhs: Address) -> Self::Output {
        self.value - rhs.value
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Self { value }
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Self { value: value as u64 }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Address({:#x})", self.value)
    }
}

/// Identifies the memory pool an address belongs to.
///
/// Pool 0 is the traced application's own address space. Every other pool is
/// synthesised by the spy, either to stand in for driver-owned memory (a
/// `VkDeviceMemory`, a GL texture level) or for its own scratch space.
#[derive(Eq, PartialEq, Ord, PartialOrd, Hash, Clone, Copy)]
pub struct PoolId(pub u32);

impl PoolId {
    pub const APPLICATION: PoolId = PoolId(0);
    pub const SCRATCH: PoolId = PoolId(u32::MAX);

    pub fn is_application(&self) -> bool {
        *self == Self::APPLICATION
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match *self {
            Self::APPLICATION => write!(f, "Pool(app)"),
            Self::SCRATCH => write!(f, "Pool(scratch)"),
            PoolId(id) => write!(f, "Pool({})", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Address, PoolId};

    #[test]
    fn we_can_offset_an_address() {
        let base: Address = 0x1000u64.into();
        let address = base.offset(0x100);

        assert_eq!(address.value, 0x1100);
        assert_eq!(address - base, 0x100);
    }

    #[test]
    fn null_is_null() {
        assert!(Address::NULL.is_null());
        assert!(!Address::from(0x10u64).is_null());
    }

    #[test]
    fn only_pool_zero_is_the_application() {
        assert!(PoolId::APPLICATION.is_application());
        assert!(!PoolId::SCRATCH.is_application());
        assert!(!PoolId(7).is_application());
    }
}
