//! Action encoding: the wire envelope for commands pushed to the server.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// A server action name. The well-known variants cover the actions the
/// viewer understands; [`ActionType::Custom`] passes any other name through
/// unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionType {
    ShowFits,
    AddExtension,
    FetchTable,
    ShowTable,
    ShowXyPlot,
    ZoomImage,
    PanImage,
    StretchImage,
    ColorImage,
    CreateRegionLayer,
    DeleteRegionLayer,
    AddRegionData,
    RemoveRegionData,
    PlotMask,
    DeleteOverlayMask,
    AddCell,
    ShowCoverage,
    ShowHips,
    ShowImageOrHips,
    ImagelineBasedFootprint,
    ReinitViewer,
    StartLabWindow,
    StartBrowserTab,
    Custom(String),
}

impl ActionType {
    /// The exact string sent on the wire.
    pub fn as_wire(&self) -> &str {
        match self {
            ActionType::ShowFits => "ImagePlotCntlr.PlotImage",
            ActionType::AddExtension => "ExternalAccessCntlr/extensionAdd",
            ActionType::FetchTable => "table.fetch",
            ActionType::ShowTable => "table.search",
            ActionType::ShowXyPlot => "charts.data/chartAdd",
            ActionType::ZoomImage => "ImagePlotCntlr.ZoomImage",
            ActionType::PanImage => "ImagePlotCntlr.recenter",
            ActionType::StretchImage => "ImagePlotCntlr.StretchChange",
            ActionType::ColorImage => "ImagePlotCntlr.ColorChange",
            ActionType::CreateRegionLayer => "DrawLayerCntlr.RegionPlot.createLayer",
            ActionType::DeleteRegionLayer => "DrawLayerCntlr.RegionPlot.deleteLayer",
            ActionType::AddRegionData => "DrawLayerCntlr.RegionPlot.addRegion",
            ActionType::RemoveRegionData => "DrawLayerCntlr.RegionPlot.removeRegion",
            ActionType::PlotMask => "ImagePlotCntlr.plotMask",
            ActionType::DeleteOverlayMask => "ImagePlotCntlr.deleteOverlayPlot",
            ActionType::AddCell => "layout.addCell",
            ActionType::ShowCoverage => "layout.enableSpecialViewer",
            ActionType::ShowHips => "ImagePlotCntlr.PlotHiPS",
            ActionType::ShowImageOrHips => "ImagePlotCntlr.plotHiPSOrImage",
            ActionType::ImagelineBasedFootprint => {
                "DrawLayerCntlr.ImageLineBasedFP.imagelineBasedFPCreate"
            }
            ActionType::ReinitViewer => "app_data.reinitApp",
            ActionType::StartLabWindow => "StartLabWindow",
            ActionType::StartBrowserTab => "StartBrowserTab",
            ActionType::Custom(name) => name,
        }
    }

    /// An action name outside the well-known set.
    pub fn custom(name: impl Into<String>) -> Self {
        ActionType::Custom(name.into())
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

impl Serialize for ActionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_wire())
    }
}

/// One action ready for dispatch: a name plus a JSON-object payload. Exists
/// only for the duration of a single dispatch call.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub payload: Map<String, Value>,
}

impl Action {
    pub fn new(action_type: ActionType, payload: Map<String, Value>) -> Self {
        Self {
            action_type,
            payload,
        }
    }

    /// Serialize into the `{"type", "payload"}` envelope the server expects.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Element 0 of the server's response array. `success` is always present;
/// any other keys the server includes are kept in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct ResultRecord {
    #[serde(default)]
    pub success: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResultRecord {
    /// Look up an extra response field by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }
}

/// Entity families that receive generated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Table,
    RegionLayer,
    Extension,
    MaskLayer,
    XyPlot,
    Cell,
    Histogram,
    Image,
    FootprintLayer,
}

impl ItemKind {
    fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Table => "Table",
            ItemKind::RegionLayer => "RegionLayer",
            ItemKind::Extension => "Extension",
            ItemKind::MaskLayer => "MaskLayer",
            ItemKind::XyPlot => "XYPlot",
            ItemKind::Cell => "Cell",
            ItemKind::Histogram => "Histogram",
            ItemKind::Image => "Image",
            ItemKind::FootprintLayer => "FootprintLayer",
        }
    }
}

const ITEM_KIND_COUNT: usize = 9;

#[allow(clippy::declare_interior_mutable_const)]
const COUNTER_INIT: AtomicU64 = AtomicU64::new(0);
static ITEM_COUNTERS: [AtomicU64; ITEM_KIND_COUNT] = [COUNTER_INIT; ITEM_KIND_COUNT];

/// Generate a process-unique id for an entity family, e.g. `Table-1`.
pub fn gen_item_id(kind: ItemKind) -> String {
    let n = ITEM_COUNTERS[kind as usize].fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}-{n}", kind.as_str())
}
