use super::Runtime;
use crate::components::ExecutionState;
use crate::error::FlowError;
use crate::value::{Literal, Value};
use std::sync::Arc;

/// Generation-checked handle to a flow instance. A handle to a destroyed
/// instance never resolves, even after its storage is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    index: u32,
    generation: u32,
}

/// One running activation of a flow.
#[derive(Debug)]
pub struct FlowState {
    pub(crate) flow_index: usize,
    pub(crate) is_action: bool,
    pub(crate) error: bool,
    pub(crate) num_async_components: usize,
    pub(crate) parent: Option<(InstanceId, usize)>,
    pub(crate) children: Vec<InstanceId>,
    /// Input slots first, then local variables.
    pub(crate) values: Vec<Value>,
    pub(crate) input_count: usize,
    pub(crate) execution_states: Vec<Option<ExecutionState>>,
    pub(crate) async_states: Vec<bool>,
}

impl FlowState {
    pub fn flow_index(&self) -> usize {
        self.flow_index
    }

    /// True for instances started by a call-action component.
    pub fn is_action(&self) -> bool {
        self.is_action
    }

    pub fn has_error(&self) -> bool {
        self.error
    }

    pub fn parent(&self) -> Option<(InstanceId, usize)> {
        self.parent
    }

    pub fn children(&self) -> &[InstanceId] {
        &self.children
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn input(&self, slot: usize) -> Option<&Value> {
        self.values[..self.input_count].get(slot)
    }

    pub fn local(&self, index: usize) -> Option<&Value> {
        self.values.get(self.input_count + index)
    }

    pub fn num_async_components(&self) -> usize {
        self.num_async_components
    }

    pub fn is_async(&self, component: usize) -> bool {
        self.async_states.get(component).copied().unwrap_or(false)
    }
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    state: Option<FlowState>,
}

/// Arena of live flow instances plus the ordered list of root instances.
#[derive(Debug, Default)]
pub struct InstanceArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    roots: Vec<InstanceId>,
    live: usize,
}

impl InstanceArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the state and links it under its parent, or as a root.
    pub(crate) fn insert(&mut self, state: FlowState) -> InstanceId {
        let parent = state.parent.map(|(parent, _)| parent);
        let id = match self.free.pop() {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                entry.state = Some(state);
                InstanceId {
                    index,
                    generation: entry.generation,
                }
            }
            None => {
                self.entries.push(Entry {
                    generation: 0,
                    state: Some(state),
                });
                InstanceId {
                    index: (self.entries.len() - 1) as u32,
                    generation: 0,
                }
            }
        };
        self.live += 1;

        match parent.and_then(|parent| self.get_mut(parent)) {
            Some(parent_state) => parent_state.children.push(id),
            None => self.roots.push(id),
        }
        id
    }

    /// Removes the state, unlinking it from its parent or the root list.
    pub(crate) fn remove(&mut self, id: InstanceId) -> Option<FlowState> {
        let entry = self
            .entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)?;
        let state = entry.state.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;

        match state.parent.and_then(|(parent, _)| self.get_mut(parent)) {
            Some(parent_state) => parent_state.children.retain(|child| *child != id),
            None => self.roots.retain(|root| *root != id),
        }
        Some(state)
    }

    pub fn get(&self, id: InstanceId) -> Option<&FlowState> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.state.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: InstanceId) -> Option<&mut FlowState> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.state.as_mut())
    }

    pub fn contains(&self, id: InstanceId) -> bool {
        self.get(id).is_some()
    }

    pub fn roots(&self) -> &[InstanceId] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl Runtime {
    /// Allocates an instance of `flow_index` and pings every component in it.
    pub(crate) fn create_flow_state(
        &mut self,
        flow_index: usize,
        parent: Option<(InstanceId, usize)>,
        is_action: bool,
    ) -> Result<InstanceId, FlowError> {
        let definition = Arc::clone(&self.definition);
        let flow = definition
            .flows
            .get(flow_index)
            .ok_or(FlowError::UnknownFlow(flow_index))?;
        if let Some((parent, _)) = parent {
            if !self.instances.contains(parent) {
                return Err(FlowError::InvalidInstance);
            }
        }

        let mut values = vec![Value::Undefined; flow.input_count()];
        values.extend(flow.local_variables.iter().map(Literal::to_value));
        let component_count = flow.components.len();

        let id = self.instances.insert(FlowState {
            flow_index,
            is_action,
            error: false,
            num_async_components: 0,
            parent,
            children: Vec::new(),
            values,
            input_count: flow.input_count(),
            execution_states: (0..component_count).map(|_| None).collect(),
            async_states: vec![false; component_count],
        });

        log::debug!("Created instance {:?} of flow '{}'", id, flow.name);
        self.hooks.on_flow_state_created(id, flow_index);

        for component in 0..component_count {
            self.ping_component(id, component);
        }
        Ok(id)
    }

    /// Destroys an instance and its descendants, deepest first.
    pub(crate) fn free_flow_state(&mut self, id: InstanceId) {
        let Some(state) = self.instances.get(id) else {
            return;
        };
        let children = state.children.clone();
        for child in children {
            self.free_flow_state(child);
        }

        let open: Vec<usize> = self
            .instances
            .get(id)
            .map(|state| {
                state
                    .execution_states
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_some())
                    .map(|(component, _)| component)
                    .collect()
            })
            .unwrap_or_default();
        for component in open {
            self.deallocate_execution_state(id, component);
        }

        self.hooks.on_flow_state_destroyed(id);
        self.queue.discard_instance(id);
        let Some(state) = self.instances.remove(id) else {
            return;
        };
        log::debug!("Destroyed instance {:?} of flow {}", id, state.flow_index);

        if state.is_action {
            if let Some((parent, component)) = state.parent {
                self.end_async_execution(parent, component);
            }
        }
    }

    /// An action instance is collectible once nothing can run in it any more.
    pub(crate) fn can_free_flow_state(&self, id: InstanceId) -> bool {
        let Some(state) = self.instances.get(id) else {
            return false;
        };
        state.is_action
            && state.num_async_components == 0
            && !self.queue.has_tasks_for(id)
            && state
                .execution_states
                .iter()
                .flatten()
                .all(|execution_state| !execution_state.keeps_instance_alive())
    }

    pub fn execution_state(&self, id: InstanceId, component: usize) -> Option<&ExecutionState> {
        self.instances
            .get(id)
            .and_then(|state| state.execution_states.get(component))
            .and_then(Option::as_ref)
    }

    pub(crate) fn allocate_execution_state(
        &mut self,
        id: InstanceId,
        component: usize,
        execution_state: ExecutionState,
    ) {
        if let Some(slot) = self
            .instances
            .get_mut(id)
            .and_then(|state| state.execution_states.get_mut(component))
        {
            *slot = Some(execution_state);
            self.hooks.on_component_execution_state_changed(id, component);
        }
    }

    pub(crate) fn deallocate_execution_state(&mut self, id: InstanceId, component: usize) {
        let released = self
            .instances
            .get_mut(id)
            .and_then(|state| state.execution_states.get_mut(component))
            .and_then(Option::take);
        if released.is_some() {
            self.hooks.on_component_execution_state_changed(id, component);
        }
    }

    /// Checks the execution state out of its slot for the duration of a step.
    pub(crate) fn take_execution_state(
        &mut self,
        id: InstanceId,
        component: usize,
    ) -> Option<ExecutionState> {
        self.instances
            .get_mut(id)
            .and_then(|state| state.execution_states.get_mut(component))
            .and_then(Option::take)
    }

    /// Returns a checked-out state (or nothing) to its slot, notifying observers
    /// only when the slot changes between empty and occupied.
    pub(crate) fn settle_execution_state(
        &mut self,
        id: InstanceId,
        component: usize,
        was_allocated: bool,
        next: Option<ExecutionState>,
    ) {
        let now_allocated = next.is_some();
        let Some(slot) = self
            .instances
            .get_mut(id)
            .and_then(|state| state.execution_states.get_mut(component))
        else {
            return;
        };
        *slot = next;
        if was_allocated != now_allocated {
            self.hooks.on_component_execution_state_changed(id, component);
        }
    }

    /// Marks a component as waiting on work outside the queue, e.g. a called flow.
    pub fn start_async_execution(&mut self, id: InstanceId, component: usize) {
        let Some(state) = self.instances.get_mut(id) else {
            return;
        };
        if let Some(flag) = state.async_states.get_mut(component) {
            if !*flag {
                *flag = true;
                state.num_async_components += 1;
                self.hooks.on_component_async_state_changed(id, component);
            }
        }
    }

    pub fn end_async_execution(&mut self, id: InstanceId, component: usize) {
        let Some(state) = self.instances.get_mut(id) else {
            return;
        };
        if let Some(flag) = state.async_states.get_mut(component) {
            if *flag {
                *flag = false;
                state.num_async_components -= 1;
                self.hooks.on_component_async_state_changed(id, component);
            }
        }
        if self.executing.is_none_or(|(executing, _)| executing != id) && self.can_free_flow_state(id)
        {
            self.free_flow_state(id);
        }
    }
}
