//! EWMH (Extended Window Manager Hints) atoms
//!
//! Every atom the window manager reads or writes is interned once at startup
//! in a single batched round trip and cached here for the life of the process.

use crate::wm::xconn::{Atom, NONE, XConn, XResult};

macro_rules! atoms {
    ($($field:ident => $name:literal),* $(,)?) => {
        /// Holds all interned atoms
        #[derive(Debug, Clone, Default)]
        pub struct Atoms {
            $(pub $field: Atom,)*
        }

        impl Atoms {
            pub const NAMES: &'static [&'static str] = &[$($name),*];

            /// Intern every atom in one batch.
            pub fn intern<C: XConn + ?Sized>(conn: &C) -> XResult<Self> {
                let ids = conn.intern_atoms(Self::NAMES)?;
                let mut ids = ids.into_iter();
                Ok(Self {
                    $($field: ids.next().unwrap_or(NONE),)*
                })
            }
        }
    };
}

atoms! {
    utf8_string => "UTF8_STRING",
    wm_protocols => "WM_PROTOCOLS",
    wm_delete_window => "WM_DELETE_WINDOW",
    wm_take_focus => "WM_TAKE_FOCUS",
    wm_state => "WM_STATE",
    wm_change_state => "WM_CHANGE_STATE",
    wm_colormap_windows => "WM_COLORMAP_WINDOWS",

    net_supported => "_NET_SUPPORTED",
    net_supporting_wm_check => "_NET_SUPPORTING_WM_CHECK",
    net_wm_name => "_NET_WM_NAME",
    net_wm_icon_name => "_NET_WM_ICON_NAME",
    net_wm_pid => "_NET_WM_PID",
    net_client_list => "_NET_CLIENT_LIST",
    net_client_list_stacking => "_NET_CLIENT_LIST_STACKING",
    net_active_window => "_NET_ACTIVE_WINDOW",
    net_number_of_desktops => "_NET_NUMBER_OF_DESKTOPS",
    net_current_desktop => "_NET_CURRENT_DESKTOP",
    net_desktop_names => "_NET_DESKTOP_NAMES",
    net_desktop_viewport => "_NET_DESKTOP_VIEWPORT",
    net_desktop_geometry => "_NET_DESKTOP_GEOMETRY",
    net_workarea => "_NET_WORKAREA",
    net_showing_desktop => "_NET_SHOWING_DESKTOP",
    net_virtual_roots => "_NET_VIRTUAL_ROOTS",
    net_close_window => "_NET_CLOSE_WINDOW",
    net_moveresize_window => "_NET_MOVERESIZE_WINDOW",
    net_wm_moveresize => "_NET_WM_MOVERESIZE",
    net_request_frame_extents => "_NET_REQUEST_FRAME_EXTENTS",
    net_frame_extents => "_NET_FRAME_EXTENTS",
    net_wm_desktop => "_NET_WM_DESKTOP",

    net_wm_state => "_NET_WM_STATE",
    net_wm_state_fullscreen => "_NET_WM_STATE_FULLSCREEN",
    net_wm_state_above => "_NET_WM_STATE_ABOVE",
    net_wm_state_below => "_NET_WM_STATE_BELOW",
    net_wm_state_sticky => "_NET_WM_STATE_STICKY",
    net_wm_state_demands_attention => "_NET_WM_STATE_DEMANDS_ATTENTION",
    net_wm_state_maximized_horz => "_NET_WM_STATE_MAXIMIZED_HORZ",
    net_wm_state_maximized_vert => "_NET_WM_STATE_MAXIMIZED_VERT",
    net_wm_state_hidden => "_NET_WM_STATE_HIDDEN",
    net_wm_state_focused => "_NET_WM_STATE_FOCUSED",
    net_wm_state_modal => "_NET_WM_STATE_MODAL",
    net_wm_state_shaded => "_NET_WM_STATE_SHADED",
    net_wm_state_skip_taskbar => "_NET_WM_STATE_SKIP_TASKBAR",
    net_wm_state_skip_pager => "_NET_WM_STATE_SKIP_PAGER",

    net_wm_window_type => "_NET_WM_WINDOW_TYPE",
    net_wm_window_type_desktop => "_NET_WM_WINDOW_TYPE_DESKTOP",
    net_wm_window_type_dock => "_NET_WM_WINDOW_TYPE_DOCK",
    net_wm_window_type_toolbar => "_NET_WM_WINDOW_TYPE_TOOLBAR",
    net_wm_window_type_menu => "_NET_WM_WINDOW_TYPE_MENU",
    net_wm_window_type_utility => "_NET_WM_WINDOW_TYPE_UTILITY",
    net_wm_window_type_splash => "_NET_WM_WINDOW_TYPE_SPLASH",
    net_wm_window_type_dialog => "_NET_WM_WINDOW_TYPE_DIALOG",
    net_wm_window_type_dropdown_menu => "_NET_WM_WINDOW_TYPE_DROPDOWN_MENU",
    net_wm_window_type_popup_menu => "_NET_WM_WINDOW_TYPE_POPUP_MENU",
    net_wm_window_type_tooltip => "_NET_WM_WINDOW_TYPE_TOOLTIP",
    net_wm_window_type_notification => "_NET_WM_WINDOW_TYPE_NOTIFICATION",
    net_wm_window_type_combo => "_NET_WM_WINDOW_TYPE_COMBO",
    net_wm_window_type_dnd => "_NET_WM_WINDOW_TYPE_DND",
    net_wm_window_type_normal => "_NET_WM_WINDOW_TYPE_NORMAL",

    net_wm_allowed_actions => "_NET_WM_ALLOWED_ACTIONS",
    net_wm_action_move => "_NET_WM_ACTION_MOVE",
    net_wm_action_resize => "_NET_WM_ACTION_RESIZE",
    net_wm_action_minimize => "_NET_WM_ACTION_MINIMIZE",
    net_wm_action_stick => "_NET_WM_ACTION_STICK",
    net_wm_action_maximize_horz => "_NET_WM_ACTION_MAXIMIZE_HORZ",
    net_wm_action_maximize_vert => "_NET_WM_ACTION_MAXIMIZE_VERT",
    net_wm_action_fullscreen => "_NET_WM_ACTION_FULLSCREEN",
    net_wm_action_change_desktop => "_NET_WM_ACTION_CHANGE_DESKTOP",
    net_wm_action_close => "_NET_WM_ACTION_CLOSE",
    net_wm_action_above => "_NET_WM_ACTION_ABOVE",
    net_wm_action_below => "_NET_WM_ACTION_BELOW",

    net_wm_strut => "_NET_WM_STRUT",
    net_wm_strut_partial => "_NET_WM_STRUT_PARTIAL",
    net_wm_icon => "_NET_WM_ICON",
    net_wm_icon_geometry => "_NET_WM_ICON_GEOMETRY",
    net_wm_user_time => "_NET_WM_USER_TIME",
    net_wm_user_time_window => "_NET_WM_USER_TIME_WINDOW",
    net_wm_ping => "_NET_WM_PING",
    net_wm_sync_request => "_NET_WM_SYNC_REQUEST",
    net_wm_sync_request_counter => "_NET_WM_SYNC_REQUEST_COUNTER",
    net_wm_window_opacity => "_NET_WM_WINDOW_OPACITY",
    motif_wm_hints => "_MOTIF_WM_HINTS",
    gtk_frame_extents => "_GTK_FRAME_EXTENTS",
}

impl Atoms {
    /// The list published as `_NET_SUPPORTED`.
    pub fn supported(&self) -> Vec<Atom> {
        vec![
            self.net_supported,
            self.net_supporting_wm_check,
            self.net_wm_name,
            self.net_wm_icon_name,
            self.net_wm_pid,
            self.net_client_list,
            self.net_client_list_stacking,
            self.net_active_window,
            self.net_number_of_desktops,
            self.net_current_desktop,
            self.net_desktop_names,
            self.net_desktop_viewport,
            self.net_desktop_geometry,
            self.net_workarea,
            self.net_showing_desktop,
            self.net_virtual_roots,
            self.net_close_window,
            self.net_moveresize_window,
            self.net_wm_moveresize,
            self.net_request_frame_extents,
            self.net_frame_extents,
            self.net_wm_desktop,
            self.net_wm_state,
            self.net_wm_state_fullscreen,
            self.net_wm_state_above,
            self.net_wm_state_below,
            self.net_wm_state_sticky,
            self.net_wm_state_demands_attention,
            self.net_wm_state_maximized_horz,
            self.net_wm_state_maximized_vert,
            self.net_wm_state_hidden,
            self.net_wm_state_focused,
            self.net_wm_state_modal,
            self.net_wm_state_shaded,
            self.net_wm_state_skip_taskbar,
            self.net_wm_state_skip_pager,
            self.net_wm_window_type,
            self.net_wm_window_type_desktop,
            self.net_wm_window_type_dock,
            self.net_wm_window_type_toolbar,
            self.net_wm_window_type_menu,
            self.net_wm_window_type_utility,
            self.net_wm_window_type_splash,
            self.net_wm_window_type_dialog,
            self.net_wm_window_type_dropdown_menu,
            self.net_wm_window_type_popup_menu,
            self.net_wm_window_type_tooltip,
            self.net_wm_window_type_notification,
            self.net_wm_window_type_combo,
            self.net_wm_window_type_dnd,
            self.net_wm_window_type_normal,
            self.net_wm_allowed_actions,
            self.net_wm_action_move,
            self.net_wm_action_resize,
            self.net_wm_action_minimize,
            self.net_wm_action_stick,
            self.net_wm_action_maximize_horz,
            self.net_wm_action_maximize_vert,
            self.net_wm_action_fullscreen,
            self.net_wm_action_change_desktop,
            self.net_wm_action_close,
            self.net_wm_action_above,
            self.net_wm_action_below,
            self.net_wm_strut,
            self.net_wm_strut_partial,
            self.net_wm_icon,
            self.net_wm_user_time,
            self.net_wm_ping,
            self.net_wm_sync_request,
            self.net_wm_window_opacity,
        ]
    }
}

/// `_NET_WM_STATE` client message actions
pub mod state_action {
    pub const REMOVE: u32 = 0;
    pub const ADD: u32 = 1;
    pub const TOGGLE: u32 = 2;
}

/// `_NET_WM_MOVERESIZE` directions
pub mod moveresize_dir {
    pub const SIZE_TOPLEFT: u32 = 0;
    pub const SIZE_TOP: u32 = 1;
    pub const SIZE_TOPRIGHT: u32 = 2;
    pub const SIZE_RIGHT: u32 = 3;
    pub const SIZE_BOTTOMRIGHT: u32 = 4;
    pub const SIZE_BOTTOM: u32 = 5;
    pub const SIZE_BOTTOMLEFT: u32 = 6;
    pub const SIZE_LEFT: u32 = 7;
    pub const MOVE: u32 = 8;
    pub const SIZE_KEYBOARD: u32 = 9;
    pub const MOVE_KEYBOARD: u32 = 10;
    pub const CANCEL: u32 = 11;
}

/// ICCCM WM_STATE values
pub mod wm_state {
    pub const WITHDRAWN: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const ICONIC: u32 = 3;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut names = Atoms::NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Atoms::NAMES.len());
    }
}
