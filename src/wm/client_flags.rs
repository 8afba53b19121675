//! Client Flags
//!
//! Bitfield flags and small enums describing a managed client: lifecycle
//! state, window type, stacking layer and the pending-work dirty masks the
//! flusher turns into requests.

use bitflags::bitflags;

use crate::wm::ewmh::Atoms;
use crate::wm::xconn::Atom;

bitflags! {
    /// Per-client pending work, cleared by the dirty flusher.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Dirty: u32 {
        const GEOM          = 1 << 0;
        const TITLE         = 1 << 1;
        const HINTS         = 1 << 2;
        const STRUT         = 1 << 3;
        const STATE         = 1 << 4;
        const STACK         = 1 << 5;
        const FRAME_ALL     = 1 << 6;
        const FRAME_TITLE   = 1 << 7;
        const FRAME_BORDER  = 1 << 8;
        const FRAME_BUTTONS = 1 << 9;
        const FRAME_STYLE   = 1 << 10;
        const DESKTOP       = 1 << 11;

        const FRAME_ANY = Self::FRAME_ALL.bits()
            | Self::FRAME_TITLE.bits()
            | Self::FRAME_BORDER.bits()
            | Self::FRAME_BUTTONS.bits()
            | Self::FRAME_STYLE.bits();
    }
}

bitflags! {
    /// Root window properties waiting to be republished.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RootDirty: u32 {
        const ACTIVE_WINDOW         = 1 << 0;
        const CLIENT_LIST           = 1 << 1;
        const CLIENT_LIST_STACKING  = 1 << 2;
        const WORKAREA              = 1 << 3;
        const DESKTOPS              = 1 << 4;
        const SHOWING_DESKTOP       = 1 << 5;
    }
}

bitflags! {
    /// Client state flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ClientFlags: u32 {
        const FOCUSED             = 1 << 0;
        const UNDECORATED         = 1 << 1;
        const URGENT              = 1 << 2;
        const ABOVE               = 1 << 3;
        const BELOW               = 1 << 4;
        const MODAL               = 1 << 5;
        const SHADED              = 1 << 6;
        const SKIP_TASKBAR        = 1 << 7;
        const SKIP_PAGER          = 1 << 8;
        /// Iconified by "show desktop", restored when it ends.
        const SHOW_DESKTOP_HIDDEN = 1 << 9;
        /// The client draws its own decorations (`_GTK_FRAME_EXTENTS`).
        const GTK_EXTENTS         = 1 << 10;
    }
}

bitflags! {
    /// WM_PROTOCOLS the client advertises
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Protocols: u8 {
        const DELETE_WINDOW = 1 << 0;
        const TAKE_FOCUS    = 1 << 1;
        const PING          = 1 << 2;
        const SYNC_REQUEST  = 1 << 3;
    }
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    #[default]
    New,
    Mapped,
    Unmapped,
    Unmanaging,
    Unmanaged,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ManagePhase {
    #[default]
    Gathering,
    Done,
}

/// ICCCM initial state from WM_HINTS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InitialState {
    #[default]
    Normal,
    Iconic,
}

/// Where a new client goes when it is first mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    #[default]
    Default,
    Center,
    Mouse,
}

/// Stacking layers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Layer {
    Desktop = 0,
    Below = 1,
    #[default]
    Normal = 2,
    Above = 3,
    Dock = 4,
    Fullscreen = 5,
    Overlay = 6,
}

impl Layer {
    pub const COUNT: usize = 7;

    pub const ALL: [Layer; Self::COUNT] = [
        Layer::Desktop,
        Layer::Below,
        Layer::Normal,
        Layer::Above,
        Layer::Dock,
        Layer::Fullscreen,
        Layer::Overlay,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Layer> {
        match name {
            "desktop" => Some(Layer::Desktop),
            "below" => Some(Layer::Below),
            "normal" => Some(Layer::Normal),
            "above" => Some(Layer::Above),
            "dock" => Some(Layer::Dock),
            "fullscreen" => Some(Layer::Fullscreen),
            "overlay" => Some(Layer::Overlay),
            _ => None,
        }
    }
}

/// Window type (matches _NET_WM_WINDOW_TYPE)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowType {
    #[default]
    Normal,
    Desktop,
    Dock,
    Toolbar,
    Menu,
    Utility,
    Splash,
    Dialog,
    DropdownMenu,
    PopupMenu,
    Tooltip,
    Notification,
    Combo,
    Dnd,
}

impl WindowType {
    /// Get window type from atom
    pub fn from_atom(atom: Atom, atoms: &Atoms) -> Option<Self> {
        let table = [
            (atoms.net_wm_window_type_desktop, WindowType::Desktop),
            (atoms.net_wm_window_type_dock, WindowType::Dock),
            (atoms.net_wm_window_type_toolbar, WindowType::Toolbar),
            (atoms.net_wm_window_type_menu, WindowType::Menu),
            (atoms.net_wm_window_type_utility, WindowType::Utility),
            (atoms.net_wm_window_type_splash, WindowType::Splash),
            (atoms.net_wm_window_type_dialog, WindowType::Dialog),
            (atoms.net_wm_window_type_dropdown_menu, WindowType::DropdownMenu),
            (atoms.net_wm_window_type_popup_menu, WindowType::PopupMenu),
            (atoms.net_wm_window_type_tooltip, WindowType::Tooltip),
            (atoms.net_wm_window_type_notification, WindowType::Notification),
            (atoms.net_wm_window_type_combo, WindowType::Combo),
            (atoms.net_wm_window_type_dnd, WindowType::Dnd),
            (atoms.net_wm_window_type_normal, WindowType::Normal),
        ];
        table.iter().find(|(a, _)| *a == atom && *a != 0).map(|(_, t)| *t)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "normal" => Some(WindowType::Normal),
            "desktop" => Some(WindowType::Desktop),
            "dock" => Some(WindowType::Dock),
            "toolbar" => Some(WindowType::Toolbar),
            "menu" => Some(WindowType::Menu),
            "utility" => Some(WindowType::Utility),
            "splash" => Some(WindowType::Splash),
            "dialog" => Some(WindowType::Dialog),
            "dropdown_menu" => Some(WindowType::DropdownMenu),
            "popup_menu" => Some(WindowType::PopupMenu),
            "tooltip" => Some(WindowType::Tooltip),
            "notification" => Some(WindowType::Notification),
            "combo" => Some(WindowType::Combo),
            "dnd" => Some(WindowType::Dnd),
            _ => None,
        }
    }

    /// Layer a client of this type starts in.
    pub fn default_layer(self) -> Layer {
        match self {
            WindowType::Desktop => Layer::Desktop,
            WindowType::Dock => Layer::Dock,
            WindowType::Splash => Layer::Above,
            WindowType::Notification
            | WindowType::Menu
            | WindowType::DropdownMenu
            | WindowType::PopupMenu
            | WindowType::Tooltip
            | WindowType::Combo
            | WindowType::Dnd => Layer::Overlay,
            _ => Layer::Normal,
        }
    }

    pub fn is_undecorated(self) -> bool {
        matches!(
            self,
            WindowType::Desktop
                | WindowType::Dock
                | WindowType::Notification
                | WindowType::Menu
                | WindowType::DropdownMenu
                | WindowType::PopupMenu
                | WindowType::Tooltip
                | WindowType::Combo
                | WindowType::Dnd
        )
    }

    pub fn is_menu(self) -> bool {
        matches!(self, WindowType::Menu | WindowType::DropdownMenu | WindowType::PopupMenu)
    }

    /// Types that keep the position they asked for.
    pub fn keeps_position(self) -> bool {
        self.is_menu()
            || matches!(
                self,
                WindowType::Dock | WindowType::Desktop | WindowType::Notification | WindowType::Tooltip
            )
    }

    /// Types never given focus on click, cycling or map.
    pub fn refuses_focus(self) -> bool {
        self.is_menu()
            || matches!(
                self,
                WindowType::Dock
                    | WindowType::Desktop
                    | WindowType::Notification
                    | WindowType::Tooltip
                    | WindowType::Combo
                    | WindowType::Dnd
            )
    }
}
