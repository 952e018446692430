//! Platform queries that arboard does not cover: the frontmost application and,
//! on macOS, the native pasteboard change count.

use super::SourceApp;

/// Application currently in front, if the platform exposes it
pub fn frontmost_application() -> Option<SourceApp> {
    imp::frontmost_application()
}

/// Native clipboard change counter, where one exists
pub fn native_change_count() -> Option<u64> {
    imp::native_change_count()
}

#[cfg(target_os = "macos")]
mod imp {
    use super::SourceApp;
    use cocoa::base::{id, nil};
    use objc::{class, msg_send, sel, sel_impl};
    use std::ffi::CStr;
    use std::os::raw::c_char;

    unsafe fn nsstring_to_string(string: id) -> Option<String> {
        if string == nil {
            return None;
        }
        let utf8_ptr: *const c_char = msg_send![string, UTF8String];
        if utf8_ptr.is_null() {
            return None;
        }
        Some(CStr::from_ptr(utf8_ptr).to_string_lossy().into_owned())
    }

    pub fn frontmost_application() -> Option<SourceApp> {
        // SAFETY: plain AppKit getters on the shared workspace; every returned
        // object is checked for nil before use.
        unsafe {
            let workspace: id = msg_send![class!(NSWorkspace), sharedWorkspace];
            if workspace == nil {
                return None;
            }
            let app: id = msg_send![workspace, frontmostApplication];
            if app == nil {
                return None;
            }
            let bundle: id = msg_send![app, bundleIdentifier];
            let name: id = msg_send![app, localizedName];

            let identifier = nsstring_to_string(bundle)?;
            let display_name = nsstring_to_string(name).unwrap_or_else(|| identifier.clone());
            Some(SourceApp::new(identifier, display_name))
        }
    }

    pub fn native_change_count() -> Option<u64> {
        // SAFETY: generalPasteboard is a process-wide singleton.
        unsafe {
            let pasteboard: id = msg_send![class!(NSPasteboard), generalPasteboard];
            if pasteboard == nil {
                return None;
            }
            let count: i64 = msg_send![pasteboard, changeCount];
            u64::try_from(count).ok()
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod imp {
    use super::SourceApp;
    use x11rb::connection::Connection;
    use x11rb::protocol::xproto::{AtomEnum, ConnectionExt};

    pub fn frontmost_application() -> Option<SourceApp> {
        // Wayland compositors do not expose the focused client to regular clients.
        if std::env::var_os("DISPLAY").is_none() {
            return None;
        }

        let (conn, screen_num) = x11rb::connect(None).ok()?;
        let root = conn.setup().roots.get(screen_num)?.root;

        let active_atom = conn
            .intern_atom(false, b"_NET_ACTIVE_WINDOW")
            .ok()?
            .reply()
            .ok()?
            .atom;
        let active = conn
            .get_property(false, root, active_atom, AtomEnum::WINDOW, 0, 1)
            .ok()?
            .reply()
            .ok()?;
        let window = active.value32()?.next()?;
        if window == 0 {
            return None;
        }

        // WM_CLASS is "instance\0class\0"
        let class = conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 256)
            .ok()?
            .reply()
            .ok()?;
        let mut parts = class
            .value
            .split(|b| *b == 0)
            .filter(|part| !part.is_empty())
            .map(|part| String::from_utf8_lossy(part).into_owned());

        let instance = parts.next()?;
        let display_name = parts.next().unwrap_or_else(|| instance.clone());
        Some(SourceApp::new(instance, display_name))
    }

    pub fn native_change_count() -> Option<u64> {
        None
    }
}

#[cfg(not(unix))]
mod imp {
    use super::SourceApp;

    pub fn frontmost_application() -> Option<SourceApp> {
        None
    }

    pub fn native_change_count() -> Option<u64> {
        None
    }
}
