//! Instances and their display state.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use samnotator_common::{SamnotatorError, SamnotatorResult};
use samnotator_project_model::{
    pick_contrast_colour, Change, FrameId, Instance, InstanceDetection, InstanceId, Mask, Rgb,
};

use crate::events::{ControllerEvent, EventQueue};

/// OKLab lightness above which markers are drawn in black.
pub const CONTRAST_THRESHOLD: f64 = 0.6;

/// Marker sizes given to new instances, in screen pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkerSizes {
    pub marker_size: u32,
    pub bbox_handle_size: u32,
}

impl MarkerSizes {
    /// Even marker sizes are rounded down to odd so markers have a centre pixel.
    pub fn new(marker_size: u32, bbox_handle_size: u32) -> Self {
        let marker_size = if marker_size % 2 == 0 {
            marker_size.saturating_sub(1).max(1)
        } else {
            marker_size
        };
        Self {
            marker_size,
            bbox_handle_size: bbox_handle_size.max(1),
        }
    }
}

impl Default for MarkerSizes {
    fn default() -> Self {
        Self::new(23, 8)
    }
}

/// An instance with its colours and display toggles.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub instance: Instance,
    pub main_colour: Rgb,
    pub contrast_colour: Rgb,
    pub marker_size: u32,
    pub bbox_handle_size: u32,
    pub show_markers: bool,
    pub show_mask: bool,
    pub show_plain_mask: bool,
}

impl InstanceInfo {
    pub fn new(instance: Instance, main_colour: Rgb) -> Self {
        Self::with_sizes(instance, main_colour, MarkerSizes::default())
    }

    pub fn with_sizes(instance: Instance, main_colour: Rgb, sizes: MarkerSizes) -> Self {
        Self {
            instance,
            main_colour,
            contrast_colour: pick_contrast_colour(main_colour, CONTRAST_THRESHOLD),
            marker_size: sizes.marker_size,
            bbox_handle_size: sizes.bbox_handle_size,
            show_markers: true,
            show_mask: true,
            show_plain_mask: false,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.instance.instance_id
    }
}

/// Partial update for [`InstanceController::update_instance`]. `None` keeps
/// the current value.
#[derive(Debug, Clone, Default)]
pub struct InstanceUpdate {
    pub name: Option<String>,
    pub colour: Option<Rgb>,
    pub category_name: Option<String>,
    pub marker_size: Option<u32>,
    pub show_markers: Option<bool>,
    pub show_mask: Option<bool>,
    pub show_plain_mask: Option<bool>,
    /// Replaces all detections; always counts as a change.
    pub detections: Option<BTreeMap<FrameId, InstanceDetection>>,
}

/// Owns the instances and the current selection.
#[derive(Debug, Default)]
pub struct InstanceController {
    instances: BTreeMap<InstanceId, InstanceInfo>,
    current: Option<InstanceId>,
    next_id: u32,
    sizes: MarkerSizes,
    events: EventQueue,
}

impl InstanceController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_marker_sizes(sizes: MarkerSizes) -> Self {
        Self {
            sizes,
            ..Self::default()
        }
    }

    /// Marker sizes new instances start with.
    pub fn marker_sizes(&self) -> MarkerSizes {
        self.sizes
    }

    fn get_mut(&mut self, instance_id: InstanceId) -> SamnotatorResult<&mut InstanceInfo> {
        self.instances
            .get_mut(&instance_id)
            .ok_or_else(|| SamnotatorError::instance(format!("Instance ID {instance_id} does not exist.")))
    }

    /// Create an instance and return its id. Ids are never reused.
    pub fn create_instance(
        &mut self,
        name: impl Into<String>,
        colour: Rgb,
        category_name: Option<String>,
    ) -> InstanceId {
        let instance_id = InstanceId(self.next_id);
        self.next_id += 1;

        let instance = Instance::new(instance_id, name, category_name);
        self.insert(InstanceInfo::with_sizes(instance, colour, self.sizes));
        instance_id
    }

    /// Insert a fully built instance, e.g. one read from a project file.
    /// Later ids are allocated after it.
    pub fn insert(&mut self, info: InstanceInfo) {
        let instance_id = info.id();
        self.next_id = self.next_id.max(instance_id.0 + 1);
        tracing::debug!(%instance_id, name = %info.instance.instance_name, "Instance created");
        self.instances.insert(instance_id, info);
        self.events
            .push(ControllerEvent::InstanceChanged(instance_id, Change::Create));
    }

    /// Remove an instance. Clears the selection if it was current.
    pub fn delete_instance(&mut self, instance_id: InstanceId) -> SamnotatorResult<InstanceInfo> {
        let info = self.instances.remove(&instance_id).ok_or_else(|| {
            SamnotatorError::instance(format!("Instance ID {instance_id} does not exist."))
        })?;
        self.events
            .push(ControllerEvent::InstanceChanged(instance_id, Change::Delete));
        if self.current == Some(instance_id) {
            self.current = None;
            self.events.push(ControllerEvent::CurrentInstanceChanged(None));
        }
        Ok(info)
    }

    /// Apply `update`. Returns whether anything changed.
    pub fn update_instance(
        &mut self,
        instance_id: InstanceId,
        update: InstanceUpdate,
    ) -> SamnotatorResult<bool> {
        let info = self.get_mut(instance_id)?;
        let mut changed = false;

        if let Some(name) = update.name {
            if name != info.instance.instance_name {
                info.instance.instance_name = name;
                changed = true;
            }
        }
        if let Some(category) = update.category_name {
            if info.instance.category_name.as_deref() != Some(category.as_str()) {
                info.instance.category_name = Some(category);
                changed = true;
            }
        }
        if let Some(size) = update.marker_size {
            if size != info.marker_size {
                info.marker_size = size;
                changed = true;
            }
        }
        if let Some(colour) = update.colour {
            if colour != info.main_colour {
                info.main_colour = colour;
                info.contrast_colour = pick_contrast_colour(colour, CONTRAST_THRESHOLD);
                changed = true;
            }
        }
        for (value, slot) in [
            (update.show_markers, &mut info.show_markers),
            (update.show_mask, &mut info.show_mask),
            (update.show_plain_mask, &mut info.show_plain_mask),
        ] {
            if let Some(value) = value {
                if value != *slot {
                    *slot = value;
                    changed = true;
                }
            }
        }
        if let Some(detections) = update.detections {
            info.instance.detections = detections;
            changed = true;
        }

        if changed {
            self.events
                .push(ControllerEvent::InstanceChanged(instance_id, Change::Update));
        }
        Ok(changed)
    }

    /// Select an instance, or clear the selection.
    pub fn set_current_instance(&mut self, instance_id: Option<InstanceId>) -> SamnotatorResult<()> {
        if let Some(id) = instance_id {
            if !self.instances.contains_key(&id) {
                return Err(SamnotatorError::instance(format!(
                    "Instance ID {id} does not exist."
                )));
            }
        }
        if self.current != instance_id {
            self.current = instance_id;
            self.events
                .push(ControllerEvent::CurrentInstanceChanged(instance_id));
        }
        Ok(())
    }

    pub fn current_instance_id(&self) -> Option<InstanceId> {
        self.current
    }

    pub fn current_instance_info(&self) -> Option<&InstanceInfo> {
        self.current.and_then(|id| self.instances.get(&id))
    }

    pub fn get(&self, instance_id: InstanceId) -> Option<&InstanceInfo> {
        self.instances.get(&instance_id)
    }

    /// Instance ids in ascending order.
    pub fn ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InstanceInfo> {
        self.instances.values()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Distinct category names, sorted.
    pub fn all_categories(&self) -> Vec<String> {
        self.instances
            .values()
            .filter_map(|info| info.instance.category_name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Main colours currently assigned.
    pub fn used_colours(&self) -> HashSet<Rgb> {
        self.instances.values().map(|info| info.main_colour).collect()
    }

    /// Detection mask of `instance_id` on `frame_id`.
    pub fn mask_for(&self, instance_id: InstanceId, frame_id: FrameId) -> Option<&Mask> {
        self.instances
            .get(&instance_id)?
            .instance
            .detection(frame_id)?
            .mask
            .as_ref()
    }

    /// Remove every instance, keeping the id counter.
    pub fn clear(&mut self) {
        for instance_id in self.ids() {
            self.events
                .push(ControllerEvent::InstanceChanged(instance_id, Change::Delete));
        }
        self.instances.clear();
        if self.current.take().is_some() {
            self.events.push(ControllerEvent::CurrentInstanceChanged(None));
        }
    }

    /// Take pending events.
    pub fn drain_events(&mut self) -> Vec<ControllerEvent> {
        self.events.drain()
    }
}
