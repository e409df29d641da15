//! Change notifications emitted by the controllers.

use std::collections::VecDeque;

use samnotator_project_model::{BBoxAnnotation, Change, FrameId, InstanceId, PointAnnotation};

/// A state change the UI (or another controller) may react to.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    PointsChanged(Vec<PointAnnotation>, Change),
    BBoxesChanged(Vec<BBoxAnnotation>, Change),
    InstanceChanged(InstanceId, Change),
    CurrentInstanceChanged(Option<InstanceId>),
    CurrentFrameChanged(Option<FrameId>),
}

/// FIFO of pending events.
#[derive(Debug, Default, Clone)]
pub struct EventQueue {
    events: VecDeque<ControllerEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: ControllerEvent) {
        tracing::trace!(?event, "event");
        self.events.push_back(event);
    }

    /// Take every pending event, oldest first.
    pub fn drain(&mut self) -> Vec<ControllerEvent> {
        self.events.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_order_and_empties() {
        let mut queue = EventQueue::new();
        queue.push(ControllerEvent::CurrentFrameChanged(Some(FrameId(0))));
        queue.push(ControllerEvent::InstanceChanged(InstanceId(1), Change::Create));
        assert_eq!(queue.len(), 2);

        let events = queue.drain();
        assert_eq!(
            events,
            vec![
                ControllerEvent::CurrentFrameChanged(Some(FrameId(0))),
                ControllerEvent::InstanceChanged(InstanceId(1), Change::Create),
            ]
        );
        assert!(queue.is_empty());
    }
}
