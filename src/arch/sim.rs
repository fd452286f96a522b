//! Software model of the CPU state the kernel touches.
//!
//! Keeps CR0/CR3, the interrupt flag and a small keyboard-controller queue
//! in plain fields, and records every state change in an event log so
//! tests can assert on ordering.

use super::{Hardware, PortIo, CR0_PE, CR0_PG};
use crate::drivers::keyboard::{DATA_PORT, STATUS_OUTPUT_FULL, STATUS_PORT};
use crate::mm::{PhysAddr, VirtAddr};

const EVENT_CAPACITY: usize = 32;
const SCANCODE_CAPACITY: usize = 16;

/// A state change observed by the simulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwEvent {
    InterruptsDisabled,
    InterruptsEnabled,
    DirectoryLoaded(PhysAddr),
    PagingEnabled,
}

/// Simulated single CPU in 32-bit protected mode.
#[derive(Debug, Clone)]
pub struct SimulatedHardware {
    cr0: u32,
    cr3: Option<PhysAddr>,
    interrupts: bool,
    stack_pointer: VirtAddr,
    instruction_pointer: VirtAddr,
    /// Only the first `event_count` slots are meaningful.
    events: [HwEvent; EVENT_CAPACITY],
    event_count: usize,
    scancodes: [u8; SCANCODE_CAPACITY],
    scancode_head: usize,
    scancode_len: usize,
}

impl SimulatedHardware {
    /// Protected mode, paging off, interrupts masked: the state `_start`
    /// hands to the kernel.
    pub const fn new() -> Self {
        Self {
            cr0: CR0_PE,
            cr3: None,
            interrupts: false,
            stack_pointer: VirtAddr::new(0),
            instruction_pointer: VirtAddr::new(0),
            events: [HwEvent::InterruptsDisabled; EVENT_CAPACITY],
            event_count: 0,
            scancodes: [0; SCANCODE_CAPACITY],
            scancode_head: 0,
            scancode_len: 0,
        }
    }

    /// Set the values reported for the stack and instruction pointers.
    pub const fn with_registers(mut self, stack_pointer: usize, instruction_pointer: usize) -> Self {
        self.stack_pointer = VirtAddr::new(stack_pointer);
        self.instruction_pointer = VirtAddr::new(instruction_pointer);
        self
    }

    pub fn cr0(&self) -> u32 {
        self.cr0
    }

    /// Last value written to CR3.
    pub fn cr3(&self) -> Option<PhysAddr> {
        self.cr3
    }

    /// Recorded state changes, oldest first.
    pub fn events(&self) -> &[HwEvent] {
        &self.events[..self.event_count]
    }

    /// Queue a scancode for the keyboard controller.
    ///
    /// Returns `false` if the queue is full.
    pub fn push_scancode(&mut self, code: u8) -> bool {
        if self.scancode_len == SCANCODE_CAPACITY {
            return false;
        }
        let tail = (self.scancode_head + self.scancode_len) % SCANCODE_CAPACITY;
        self.scancodes[tail] = code;
        self.scancode_len += 1;
        true
    }

    /// Append to the event log. Overflow is a test bug: a truncated log
    /// would let ordering assertions pass on partial data.
    fn record(&mut self, event: HwEvent) {
        debug_assert!(
            self.event_count < EVENT_CAPACITY,
            "simulated event log full ({} events)",
            EVENT_CAPACITY
        );
        if self.event_count < EVENT_CAPACITY {
            self.events[self.event_count] = event;
            self.event_count += 1;
        }
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardware for SimulatedHardware {
    unsafe fn load_page_directory(&mut self, root: PhysAddr) {
        self.cr3 = Some(root);
        self.record(HwEvent::DirectoryLoaded(root));
    }

    unsafe fn enable_paging(&mut self) {
        self.cr0 |= CR0_PG | CR0_PE;
        self.record(HwEvent::PagingEnabled);
    }

    fn paging_enabled(&self) -> bool {
        self.cr0 & CR0_PG != 0
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    fn disable_interrupts(&mut self) {
        self.interrupts = false;
        self.record(HwEvent::InterruptsDisabled);
    }

    unsafe fn enable_interrupts(&mut self) {
        self.interrupts = true;
        self.record(HwEvent::InterruptsEnabled);
    }

    fn stack_pointer(&self) -> VirtAddr {
        self.stack_pointer
    }

    fn instruction_pointer(&self) -> VirtAddr {
        self.instruction_pointer
    }

    fn privilege_level(&self) -> u8 {
        0
    }
}

impl PortIo for SimulatedHardware {
    /// Models the 8042 status and data ports; every other port reads 0xFF
    /// like an empty bus.
    unsafe fn inb(&mut self, port: u16) -> u8 {
        match port {
            STATUS_PORT if self.scancode_len > 0 => STATUS_OUTPUT_FULL,
            STATUS_PORT => 0,
            DATA_PORT if self.scancode_len > 0 => {
                let code = self.scancodes[self.scancode_head];
                self.scancode_head = (self.scancode_head + 1) % SCANCODE_CAPACITY;
                self.scancode_len -= 1;
                code
            }
            DATA_PORT => 0,
            _ => 0xFF,
        }
    }

    unsafe fn outb(&mut self, _port: u16, _value: u8) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging_registers() {
        let mut hw = SimulatedHardware::new();
        assert!(!hw.paging_enabled());
        assert_eq!(hw.cr3(), None);

        unsafe {
            hw.load_page_directory(PhysAddr::new(0x0010_5000));
            hw.enable_paging();
        }
        assert!(hw.paging_enabled());
        assert_eq!(hw.cr0(), 0x8000_0001);
        assert_eq!(hw.cr3(), Some(PhysAddr::new(0x0010_5000)));
        assert_eq!(
            hw.events(),
            [
                HwEvent::DirectoryLoaded(PhysAddr::new(0x0010_5000)),
                HwEvent::PagingEnabled
            ]
        );
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "simulated event log full")]
    fn test_event_log_overflow_panics() {
        let mut hw = SimulatedHardware::new();
        for _ in 0..=EVENT_CAPACITY {
            hw.disable_interrupts();
        }
    }

    #[test]
    fn test_keyboard_queue() {
        let mut hw = SimulatedHardware::new();
        assert_eq!(unsafe { hw.inb(STATUS_PORT) }, 0);

        assert!(hw.push_scancode(0x1E));
        assert!(hw.push_scancode(0x9E));
        unsafe {
            assert_eq!(hw.inb(STATUS_PORT) & STATUS_OUTPUT_FULL, STATUS_OUTPUT_FULL);
            assert_eq!(hw.inb(DATA_PORT), 0x1E);
            assert_eq!(hw.inb(DATA_PORT), 0x9E);
            assert_eq!(hw.inb(STATUS_PORT), 0);
        }
    }

    #[test]
    fn test_scancode_queue_full() {
        let mut hw = SimulatedHardware::new();
        for code in 0..SCANCODE_CAPACITY as u8 {
            assert!(hw.push_scancode(code));
        }
        assert!(!hw.push_scancode(0xFF));
    }
}
