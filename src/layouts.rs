use crate::model::CameraAngle;
use serde::{Deserialize, Serialize};

/// Relative slot on a page. `y` and `h` are fractions of the usable page
/// height, `size` is a "W:H" aspect ratio, `offset_x` a fraction of the
/// usable width applied after alignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutSlot {
    pub slot_id: u32,
    pub y: f64,
    pub h: f64,
    pub size: String,
    pub align: SlotAlign,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_x: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotAlign {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone)]
pub struct Layout {
    pub name: &'static str,
    pub page_count: u32,
    pub panels_per_page: &'static [u32],
    pub pages: Vec<Vec<LayoutSlot>>,
}

impl Layout {
    pub fn total_panels(&self) -> u32 {
        self.panels_per_page.iter().sum()
    }
}

fn slot(
    slot_id: u32,
    y: f64,
    h: f64,
    size: &str,
    align: SlotAlign,
    offset_x: Option<f64>,
) -> LayoutSlot {
    LayoutSlot {
        slot_id,
        y,
        h,
        size: size.to_string(),
        align,
        offset_x,
    }
}

fn three_panel_page() -> Vec<LayoutSlot> {
    vec![
        slot(1, 0.00, 0.31, "3:2", SlotAlign::Left, None),
        slot(2, 0.34, 0.31, "3:2", SlotAlign::Right, None),
        slot(3, 0.68, 0.31, "3:2", SlotAlign::Center, None),
    ]
}

fn two_panel_page() -> Vec<LayoutSlot> {
    vec![
        slot(1, 0.00, 0.47, "3:2", SlotAlign::Center, None),
        slot(2, 0.52, 0.47, "3:2", SlotAlign::Center, None),
    ]
}

/// The fixed layout table shipped with the binary. There is intentionally
/// no 2-page entry; requests for pageCount=2 fall back to the three-page
/// layout via auto-detection.
pub fn layout_for_page_count(page_count: u32) -> Option<Layout> {
    match page_count {
        1 => Some(Layout {
            name: "single-panel",
            page_count: 1,
            panels_per_page: &[1],
            pages: vec![vec![slot(1, 0.0, 1.0, "2:3", SlotAlign::Center, None)]],
        }),
        3 => Some(Layout {
            name: "three-page-story",
            page_count: 3,
            panels_per_page: &[3, 3, 2],
            pages: vec![three_panel_page(), three_panel_page(), two_panel_page()],
        }),
        4 => Some(Layout {
            name: "four-page-story",
            page_count: 4,
            panels_per_page: &[3, 3, 3, 3],
            pages: vec![
                three_panel_page(),
                three_panel_page(),
                three_panel_page(),
                three_panel_page(),
            ],
        }),
        5 => Some(Layout {
            name: "five-page-story",
            page_count: 5,
            panels_per_page: &[3, 3, 3, 3, 2],
            pages: vec![
                three_panel_page(),
                three_panel_page(),
                three_panel_page(),
                three_panel_page(),
                two_panel_page(),
            ],
        }),
        _ => None,
    }
}

/// Resolve a layout for a requested page count, falling back to the
/// three-page layout when the table has no entry (e.g. pageCount=2).
pub fn resolve_layout(page_count: u32) -> Layout {
    layout_for_page_count(page_count)
        .unwrap_or_else(|| layout_for_page_count(3).expect("three-page layout must exist"))
}

/// Pick a layout by the number of panels to place.
pub fn auto_detect_layout(total_panels: u32) -> Layout {
    let page_count = match total_panels {
        0 | 1 => 1,
        2..=8 => 3,
        9..=12 => 4,
        _ => 5,
    };
    layout_for_page_count(page_count).expect("layout table covers all auto-detected counts")
}

/// Positionally fixed camera-angle sequence per page count. The text
/// model's suggested angle is always overwritten with the entry for the
/// panel's index.
pub fn camera_sequence(page_count: u32) -> &'static [CameraAngle] {
    use CameraAngle::*;
    const ONE: &[CameraAngle] = &[EstablishingShot];
    const THREE: &[CameraAngle] = &[
        EstablishingShot,
        MediumShot,
        CloseUp,
        TwoShot,
        OverShoulder,
        LowAngle,
        HighAngle,
        WideShot,
    ];
    const FOUR: &[CameraAngle] = &[
        EstablishingShot,
        MediumShot,
        CloseUp,
        TwoShot,
        OverShoulder,
        LowAngle,
        HighAngle,
        WideShot,
        ExtremeCloseUp,
        BirdsEyeView,
        DutchAngle,
        PointOfView,
    ];
    const FIVE: &[CameraAngle] = &[
        EstablishingShot,
        MediumShot,
        CloseUp,
        TwoShot,
        OverShoulder,
        LowAngle,
        HighAngle,
        WideShot,
        ExtremeCloseUp,
        BirdsEyeView,
        DutchAngle,
        PointOfView,
        EyeLevel,
        AerialView,
    ];
    match page_count {
        1 => ONE,
        4 => FOUR,
        5 => FIVE,
        _ => THREE,
    }
}

/// Angle for a 0-based panel index, clamping to the last table entry for
/// indexes beyond the sequence.
pub fn camera_angle_for(page_count: u32, panel_index: usize) -> CameraAngle {
    let seq = camera_sequence(page_count);
    seq[panel_index.min(seq.len() - 1)]
}

/// Default panel image dimensions; panels are generated wide.
pub const DEFAULT_PANEL_WIDTH: u32 = 1456;
pub const DEFAULT_PANEL_HEIGHT: u32 = 720;
