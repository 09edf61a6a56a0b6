//! Typed accessor over the LPC43xx USB0/USB1 SEHCI register block.
//!
//! Offsets and bitfields follow UM10503 §23 and the EHCI device-mode
//! extensions it implements. Every composite status register that this
//! core clears is read-and-cleared with a single `get()` followed by a
//! write-back of that same value, so bits set by hardware between the
//! read and the write are preserved rather than clobbered.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::register_bitfields;
use tock_registers::registers::ReadWrite;

register_bitfields![u32,
    pub USBCMD [
        RS OFFSET(0) NUMBITS(1) [],
        RST OFFSET(1) NUMBITS(1) [],
        FS0_1 OFFSET(2) NUMBITS(2) [],
        PSE OFFSET(4) NUMBITS(1) [],
        ASE OFFSET(5) NUMBITS(1) [],
        IAA OFFSET(6) NUMBITS(1) [],
        ASP OFFSET(8) NUMBITS(2) [],
        ASPE OFFSET(11) NUMBITS(1) [],
        ATDTW OFFSET(12) NUMBITS(1) [],
        SUTW OFFSET(13) NUMBITS(1) [],
        ITC OFFSET(16) NUMBITS(8) [],
    ],
    pub USBSTS [
        UI OFFSET(0) NUMBITS(1) [],
        UEI OFFSET(1) NUMBITS(1) [],
        PCI OFFSET(2) NUMBITS(1) [],
        FRI OFFSET(3) NUMBITS(1) [],
        SEI OFFSET(4) NUMBITS(1) [],
        AAI OFFSET(5) NUMBITS(1) [],
        URI OFFSET(6) NUMBITS(1) [],
        SRI OFFSET(7) NUMBITS(1) [],
        SLI OFFSET(8) NUMBITS(1) [],
        HCH OFFSET(12) NUMBITS(1) [],
        RCL OFFSET(13) NUMBITS(1) [],
        PS OFFSET(14) NUMBITS(1) [],
        AS OFFSET(15) NUMBITS(1) [],
        NAKI OFFSET(16) NUMBITS(1) [],
    ],
    pub USBINTR [
        UE OFFSET(0) NUMBITS(1) [],
        UEE OFFSET(1) NUMBITS(1) [],
        PCE OFFSET(2) NUMBITS(1) [],
        FRE OFFSET(3) NUMBITS(1) [],
        SEE OFFSET(4) NUMBITS(1) [],
        AAE OFFSET(5) NUMBITS(1) [],
        URE OFFSET(6) NUMBITS(1) [],
        SRE OFFSET(7) NUMBITS(1) [],
        SLE OFFSET(8) NUMBITS(1) [],
        NAKE OFFSET(16) NUMBITS(1) [],
    ],
    pub DEVICEADDR [
        USBADRA OFFSET(24) NUMBITS(1) [],
        USBADR OFFSET(25) NUMBITS(7) [],
    ],
    pub PORTSC1 [
        CCS OFFSET(0) NUMBITS(1) [],
        PE OFFSET(2) NUMBITS(1) [],
        PEC OFFSET(3) NUMBITS(1) [],
        FPR OFFSET(6) NUMBITS(1) [],
        SUSP OFFSET(7) NUMBITS(1) [],
        PR OFFSET(8) NUMBITS(1) [],
        HSP OFFSET(9) NUMBITS(1) [],
        PSPD OFFSET(26) NUMBITS(2) [
            Full = 0,
            Low = 1,
            High = 2,
        ],
    ],
    pub OTGSC [
        VD OFFSET(0) NUMBITS(1) [],
        VC OFFSET(1) NUMBITS(1) [],
    ],
    pub USBMODE [
        CM OFFSET(0) NUMBITS(2) [
            Idle = 0,
            Device = 2,
            Host = 3,
        ],
        ES OFFSET(2) NUMBITS(1) [],
        SLOM OFFSET(3) NUMBITS(1) [],
    ],
    pub ENDPTSETUPSTAT [
        BITS OFFSET(0) NUMBITS(32) [],
    ],
    pub ENDPTPRIME [
        PERB OFFSET(0) NUMBITS(16) [],
        PETB OFFSET(16) NUMBITS(16) [],
    ],
    pub ENDPTFLUSH [
        FERB OFFSET(0) NUMBITS(16) [],
        FETB OFFSET(16) NUMBITS(16) [],
    ],
    pub ENDPTSTAT [
        ERBR OFFSET(0) NUMBITS(16) [],
        ETBR OFFSET(16) NUMBITS(16) [],
    ],
    pub ENDPTCOMPLETE [
        ERCE OFFSET(0) NUMBITS(16) [],
        ETCE OFFSET(16) NUMBITS(16) [],
    ],
    pub ENDPTCTRL [
        RXS OFFSET(0) NUMBITS(1) [],
        RXT OFFSET(2) NUMBITS(2) [],
        RXE OFFSET(7) NUMBITS(1) [],
        TXS OFFSET(16) NUMBITS(1) [],
        TXT OFFSET(18) NUMBITS(2) [],
        TXE OFFSET(23) NUMBITS(1) [],
    ],
];

pub const ENDPTCTRL_COUNT: usize = 6;

/// The SEHCI operational register block, 0x140 bytes into the controller's
/// MMIO window on LPC43xx USB0/USB1 (UM10503 §23).
#[repr(C)]
pub struct RegisterBlock {
    pub usbcmd: ReadWrite<u32, USBCMD::Register>,
    pub usbsts: ReadWrite<u32, USBSTS::Register>,
    pub usbintr: ReadWrite<u32, USBINTR::Register>,
    pub frindex: ReadWrite<u32>,
    _reserved0: ReadWrite<u32>,
    /// `deviceaddr` in device mode, `periodiclistbase` in host mode.
    pub deviceaddr: ReadWrite<u32, DEVICEADDR::Register>,
    /// `endpointlistaddr` in device mode, `asynclistaddr` in host mode.
    pub endpointlistaddr: ReadWrite<u32>,
    _reserved1: [ReadWrite<u32>; 9],
    pub endptnak: ReadWrite<u32>,
    pub endptnaken: ReadWrite<u32>,
    _reserved2: ReadWrite<u32>,
    pub portsc1: ReadWrite<u32, PORTSC1::Register>,
    _reserved3: [ReadWrite<u32>; 7],
    pub otgsc: ReadWrite<u32, OTGSC::Register>,
    pub usbmode: ReadWrite<u32, USBMODE::Register>,
    pub endptsetupstat: ReadWrite<u32, ENDPTSETUPSTAT::Register>,
    pub endptprime: ReadWrite<u32, ENDPTPRIME::Register>,
    pub endptflush: ReadWrite<u32, ENDPTFLUSH::Register>,
    pub endptstat: ReadWrite<u32, ENDPTSTAT::Register>,
    pub endptcomplete: ReadWrite<u32, ENDPTCOMPLETE::Register>,
    pub endptctrl: [ReadWrite<u32, ENDPTCTRL::Register>; ENDPTCTRL_COUNT],
}

impl RegisterBlock {
    /// An all-zero register block, useful for test doubles and for the
    /// static storage this crate reserves for each controller instance.
    pub const fn zeroed() -> Self {
        Self {
            usbcmd: ReadWrite::new(0),
            usbsts: ReadWrite::new(0),
            usbintr: ReadWrite::new(0),
            frindex: ReadWrite::new(0),
            _reserved0: ReadWrite::new(0),
            deviceaddr: ReadWrite::new(0),
            endpointlistaddr: ReadWrite::new(0),
            _reserved1: [ReadWrite::new(0); 9],
            endptnak: ReadWrite::new(0),
            endptnaken: ReadWrite::new(0),
            _reserved2: ReadWrite::new(0),
            portsc1: ReadWrite::new(0),
            _reserved3: [ReadWrite::new(0); 7],
            otgsc: ReadWrite::new(0),
            usbmode: ReadWrite::new(0),
            endptsetupstat: ReadWrite::new(0),
            endptprime: ReadWrite::new(0),
            endptflush: ReadWrite::new(0),
            endptstat: ReadWrite::new(0),
            endptcomplete: ReadWrite::new(0),
            endptctrl: [ReadWrite::new(0); ENDPTCTRL_COUNT],
        }
    }

    /// Read-and-clear `USBSTS` masked by `USBINTR`: reads the composite
    /// status register once, returns the value, and writes the same
    /// value back to clear exactly the bits that were observed set.
    pub fn take_status(&self) -> u32 {
        let pending = self.usbsts.get() & self.usbintr.get();
        self.usbsts.set(pending);
        pending
    }

    /// Whether the given ENDPTSTAT bitmask is currently set ("endpoint
    /// ready"), used by the ATDTW append handshake (§4.C).
    pub fn endptstat_bit(&self, mask: u32) -> bool {
        self.endptstat.get() & mask != 0
    }

    /// Clear one endpoint's setup-status bit, spinning until the
    /// hardware acknowledges (bounded by `budget` iterations).
    pub fn clear_setup_status(&self, ep_num: usize, budget: u32) -> bool {
        let bit = 1u32 << ep_num;
        self.endptsetupstat.set(bit);
        for _ in 0..budget {
            if self.endptsetupstat.get() & bit == 0 {
                return true;
            }
        }
        self.endptsetupstat.get() & bit == 0
    }
}

// Safety: the register block is only ever accessed through `&RegisterBlock`
// behind the peripheral's controller-owned storage; tock-registers'
// `ReadWrite` performs its own volatile access internally.
unsafe impl Sync for RegisterBlock {}
