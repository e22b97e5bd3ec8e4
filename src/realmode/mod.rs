pub mod bda;
pub mod memory;
pub mod regs;
pub mod segoff;

pub use self::memory::Memory;
pub use self::regs::{CpuFlag, Register, RegisterFrame};
pub use self::segoff::SegOff;
