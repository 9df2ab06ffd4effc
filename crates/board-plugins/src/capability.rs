//! Diagnostic capabilities a board module may export.
//!
//! Each capability is a marker type naming its exported symbol and argument
//! shape. Modules resolve every known symbol once, at load time, into a
//! [`Capabilities`] record; a `None` slot means the board does not support
//! that diagnostic.

use crate::Token;
use std::os::raw::c_int;

/// Entry point shape shared by the single-argument diagnostics.
pub type InfoFn = unsafe extern "C" fn(token: Token) -> c_int;

/// Event log entry point: record range plus three print-mode flags.
pub type EventLogFn = unsafe extern "C" fn(
    token: Token,
    first: u32,
    last: u32,
    print_list: bool,
    print_sensors: bool,
    print_bits: bool,
) -> c_int;

/// Entry points resolved from one loaded module.
#[derive(Clone, Copy, Debug, Default)]
pub struct Capabilities {
    pub board_info: Option<InfoFn>,
    pub mac_info: Option<InfoFn>,
    pub phy_info: Option<InfoFn>,
    pub security_info: Option<InfoFn>,
    pub fme_verbose_info: Option<InfoFn>,
    pub boot_info: Option<InfoFn>,
    pub image_info: Option<InfoFn>,
    pub event_log: Option<EventLogFn>,
}

impl Capabilities {
    /// Names of the capabilities this record provides.
    pub fn supported(&self) -> Vec<&'static str> {
        let slots: [(&'static str, bool); 8] = [
            (BoardInfo::NAME, self.board_info.is_some()),
            (MacInfo::NAME, self.mac_info.is_some()),
            (PhyInfo::NAME, self.phy_info.is_some()),
            (SecurityInfo::NAME, self.security_info.is_some()),
            (FmeVerboseInfo::NAME, self.fme_verbose_info.is_some()),
            (BootInfo::NAME, self.boot_info.is_some()),
            (ImageInfo::NAME, self.image_info.is_some()),
            (EventLog::NAME, self.event_log.is_some()),
        ];
        slots
            .into_iter()
            .filter_map(|(name, present)| present.then_some(name))
            .collect()
    }
}

/// A named diagnostic with its argument shape.
pub trait Capability {
    type Args;
    type Entry: Copy;

    /// Human-readable name, e.g. "mac info".
    const NAME: &'static str;
    /// Symbol exported by board modules.
    const SYMBOL: &'static str;

    fn entry(caps: &Capabilities) -> Option<Self::Entry>;

    /// Call the entry point.
    ///
    /// # Safety
    /// `entry` must come from a module that stays loaded for the duration of
    /// the call, and `token` must be valid for that module.
    unsafe fn call(entry: Self::Entry, token: Token, args: Self::Args) -> c_int;
}

macro_rules! info_capability {
    ($(#[$meta:meta])* $ty:ident, $field:ident, $name:literal, $symbol:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug)]
        pub struct $ty;

        impl Capability for $ty {
            type Args = ();
            type Entry = InfoFn;

            const NAME: &'static str = $name;
            const SYMBOL: &'static str = $symbol;

            fn entry(caps: &Capabilities) -> Option<InfoFn> {
                caps.$field
            }

            unsafe fn call(entry: InfoFn, token: Token, _args: ()) -> c_int {
                // SAFETY: upheld by the caller.
                unsafe { entry(token) }
            }
        }
    };
}

info_capability!(
    /// Board version and firmware summary.
    BoardInfo, board_info, "board info", "print_board_info"
);
info_capability!(MacInfo, mac_info, "mac info", "print_mac_info");
info_capability!(PhyInfo, phy_info, "phy group info", "print_phy_info");
info_capability!(SecurityInfo, security_info, "security info", "print_sec_info");
info_capability!(
    FmeVerboseInfo,
    fme_verbose_info,
    "fme verbose info",
    "print_fme_verbose_info"
);
info_capability!(
    /// FPGA boot page.
    BootInfo, boot_info, "boot info", "fpga_boot_info"
);
info_capability!(ImageInfo, image_info, "image info", "fpga_image_info");

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct EventLogArgs {
    pub first: u32,
    pub last: u32,
    pub print_list: bool,
    pub print_sensors: bool,
    pub print_bits: bool,
}

#[derive(Clone, Copy, Debug)]
pub struct EventLog;

impl Capability for EventLog {
    type Args = EventLogArgs;
    type Entry = EventLogFn;

    const NAME: &'static str = "event log";
    const SYMBOL: &'static str = "fpga_event_log";

    fn entry(caps: &Capabilities) -> Option<EventLogFn> {
        caps.event_log
    }

    unsafe fn call(entry: EventLogFn, token: Token, args: EventLogArgs) -> c_int {
        // SAFETY: upheld by the caller.
        unsafe {
            entry(
                token,
                args.first,
                args.last,
                args.print_list,
                args.print_sensors,
                args.print_bits,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    extern "C" fn ok_info(_token: Token) -> c_int {
        0
    }

    extern "C" fn range_len(
        _token: Token,
        first: u32,
        last: u32,
        print_list: bool,
        _print_sensors: bool,
        _print_bits: bool,
    ) -> c_int {
        if print_list {
            (last - first) as c_int
        } else {
            -1
        }
    }

    #[test]
    fn test_supported_lists_present_slots() {
        let caps = Capabilities {
            mac_info: Some(ok_info as InfoFn),
            event_log: Some(range_len as EventLogFn),
            ..Default::default()
        };
        assert_eq!(caps.supported(), vec!["mac info", "event log"]);
        assert!(Capabilities::default().supported().is_empty());
    }

    #[test]
    fn test_entry_selects_slot() {
        let caps = Capabilities {
            phy_info: Some(ok_info as InfoFn),
            ..Default::default()
        };
        assert!(PhyInfo::entry(&caps).is_some());
        assert!(MacInfo::entry(&caps).is_none());
        assert!(EventLog::entry(&caps).is_none());
    }

    #[test]
    fn test_event_log_args_forwarded() {
        let args = EventLogArgs {
            first: 2,
            last: 9,
            print_list: true,
            ..Default::default()
        };
        let code = unsafe { EventLog::call(range_len as EventLogFn, Token::null(), args) };
        assert_eq!(code, 7);
    }

    #[test]
    fn test_symbol_names() {
        assert_eq!(SecurityInfo::SYMBOL, "print_sec_info");
        assert_eq!(BootInfo::SYMBOL, "fpga_boot_info");
        assert_eq!(EventLog::SYMBOL, "fpga_event_log");
    }
}
