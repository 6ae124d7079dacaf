//! Node arena and wiring. The `Lab` owns every node for the process lifetime and
//! keeps the upstream graph so wiring can refuse edges that would close a loop.

use super::{
    ElectricalLink, ElectricalNode, OpticalLink, OpticalNode, Reconfigurable, RetimableLink,
    RetimableSource,
};
use anyhow::{Result, bail};
use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

static NEXT_LAB: AtomicUsize = AtomicUsize::new(0);

/// Index of a node within the lab that registered it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    lab: usize,
    index: usize,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.lab, self.index)
    }
}

/// Strong handle to a node registered in a [`Lab`].
pub struct Handle<T> {
    id: NodeId,
    cell: Rc<RefCell<T>>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> Handle<T> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        self.cell.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.cell.borrow_mut()
    }

    pub fn downgrade(&self) -> Weak<RefCell<T>> {
        Rc::downgrade(&self.cell)
    }
}

impl<T: OpticalNode + 'static> Handle<T> {
    pub fn optical(&self) -> OpticalLink {
        let node: Rc<RefCell<dyn OpticalNode>> = self.cell.clone();
        Rc::downgrade(&node)
    }
}

impl<T: ElectricalNode + 'static> Handle<T> {
    pub fn electrical(&self) -> ElectricalLink {
        let node: Rc<RefCell<dyn ElectricalNode>> = self.cell.clone();
        Rc::downgrade(&node)
    }
}

impl<T: RetimableSource + 'static> Handle<T> {
    pub fn retimable(&self) -> RetimableLink {
        let node: Rc<RefCell<dyn RetimableSource>> = self.cell.clone();
        Rc::downgrade(&node)
    }
}

struct Slot {
    label: String,
    upstreams: Vec<NodeId>,
    _node: Rc<dyn Any>,
}

pub struct Lab {
    id: usize,
    slots: Vec<Slot>,
}

impl Default for Lab {
    fn default() -> Self {
        Self {
            id: NEXT_LAB.fetch_add(1, Ordering::Relaxed),
            slots: Vec::new(),
        }
    }
}

impl Lab {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<T: 'static>(&mut self, label: impl Into<String>, node: T) -> Handle<T> {
        let id = NodeId {
            lab: self.id,
            index: self.slots.len(),
        };
        let cell = Rc::new(RefCell::new(node));
        let label = label.into();
        debug!("[lab] registered {label} as {id}");
        self.slots.push(Slot {
            label,
            upstreams: Vec::new(),
            _node: cell.clone(),
        });
        Handle { id, cell }
    }

    /// Registers a node built from its defaults and then handed `config`,
    /// the same path a settings change takes later.
    pub fn add_configured<C, T>(&mut self, label: impl Into<String>, config: C) -> Handle<T>
    where
        T: Default + Reconfigurable<C> + 'static,
    {
        let mut node = T::default();
        node.update_config(config);
        self.add(label, node)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn label(&self, id: NodeId) -> Option<&str> {
        self.slot(id).map(|slot| slot.label.as_str())
    }

    pub fn upstreams(&self, id: NodeId) -> &[NodeId] {
        self.slot(id)
            .map(|slot| slot.upstreams.as_slice())
            .unwrap_or(&[])
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        if id.lab != self.id {
            return None;
        }
        self.slots.get(id.index)
    }

    /// Records `upstreams` as the data sources of `downstream` and then runs
    /// `wire` so the node can store its weak links. Replaces any previous
    /// inputs of `downstream`.
    pub fn connect<T>(
        &mut self,
        downstream: &Handle<T>,
        upstreams: &[NodeId],
        wire: impl FnOnce(&mut T),
    ) -> Result<()> {
        let target = downstream.id;
        self.check_known(target)?;
        for &up in upstreams {
            self.check_known(up)?;
            if up == target {
                bail!("cannot wire {} to itself", self.describe(target));
            }
            if self.reaches(up, target) {
                bail!(
                    "wiring {} into {} would close a loop",
                    self.describe(up),
                    self.describe(target)
                );
            }
        }

        self.slots[target.index].upstreams = upstreams.to_vec();
        wire(&mut *downstream.cell.borrow_mut());
        info!(
            "[lab] {} <- [{}]",
            self.describe(target),
            upstreams
                .iter()
                .map(|&id| self.describe(id))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    /// Hands a source the sampling contract of an instrument. Clock links run
    /// against the data flow and do not take part in loop detection.
    pub fn sync<T>(
        &mut self,
        source: &Handle<T>,
        sink: NodeId,
        wire: impl FnOnce(&mut T),
    ) -> Result<()> {
        self.check_known(source.id)?;
        self.check_known(sink)?;
        wire(&mut *source.cell.borrow_mut());
        debug!(
            "[lab] {} follows the clock of {}",
            self.describe(source.id),
            self.describe(sink)
        );
        Ok(())
    }

    fn check_known(&self, id: NodeId) -> Result<()> {
        if id.lab != self.id {
            bail!("node {id} belongs to another lab");
        }
        if id.index >= self.slots.len() {
            bail!("unknown node {id}");
        }
        Ok(())
    }

    fn describe(&self, id: NodeId) -> String {
        match self.label(id) {
            Some(label) => format!("{label} ({id})"),
            None => id.to_string(),
        }
    }

    // Depth-first walk along upstream edges starting at `from`.
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut seen = vec![false; self.slots.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut seen[id.index], true) {
                continue;
            }
            stack.extend(self.slots[id.index].upstreams.iter().copied());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Probe {
        wired: usize,
    }

    #[test]
    fn connect_records_edges_and_runs_wiring() {
        let mut lab = Lab::new();
        let a = lab.add("a", Probe::default());
        let b = lab.add("b", Probe::default());
        lab.connect(&b, &[a.id()], |p| p.wired += 1).unwrap();
        assert_eq!(b.borrow().wired, 1);
        assert_eq!(lab.upstreams(b.id()), &[a.id()]);
        assert_eq!(lab.label(a.id()), Some("a"));
    }

    #[test]
    fn rejects_self_loops_and_cycles() {
        let mut lab = Lab::new();
        let a = lab.add("a", Probe::default());
        let b = lab.add("b", Probe::default());
        let c = lab.add("c", Probe::default());
        assert!(lab.connect(&a, &[a.id()], |_| {}).is_err());

        lab.connect(&b, &[a.id()], |_| {}).unwrap();
        lab.connect(&c, &[b.id()], |_| {}).unwrap();
        let err = lab.connect(&a, &[c.id()], |p| p.wired += 1);
        assert!(err.is_err());
        // Rejected wiring never reaches the node.
        assert_eq!(a.borrow().wired, 0);
        assert!(lab.upstreams(a.id()).is_empty());
    }

    #[test]
    fn rejects_unknown_nodes() {
        let mut lab = Lab::new();
        let a = lab.add("a", Probe::default());
        let mut other = Lab::new();
        other.add("x", Probe::default());
        let stranger = other.add("y", Probe::default());
        assert!(lab.connect(&a, &[stranger.id()], |_| {}).is_err());
    }

    #[test]
    fn handles_from_another_lab_are_refused_even_when_the_index_exists() {
        let mut lab = Lab::new();
        let a = lab.add("a", Probe::default());
        let b = lab.add("b", Probe::default());
        let mut other = Lab::new();
        let foreign = other.add("x", Probe::default());

        // `foreign` sits at index 0, which `lab` also holds.
        let err = lab.connect(&b, &[foreign.id()], |_| {}).unwrap_err();
        assert!(err.to_string().contains("another lab"), "{err}");
        assert!(lab.connect(&foreign, &[a.id()], |p| p.wired += 1).is_err());
        assert!(lab.sync(&foreign, b.id(), |p| p.wired += 1).is_err());
        assert_eq!(foreign.borrow().wired, 0);
        assert_eq!(lab.label(foreign.id()), None);
        assert!(lab.upstreams(foreign.id()).is_empty());
    }

    #[test]
    fn configured_nodes_receive_their_config() {
        #[derive(Default)]
        struct Dial {
            level: u32,
        }
        impl Reconfigurable<u32> for Dial {
            fn update_config(&mut self, config: u32) {
                self.level = config;
            }
        }
        let mut lab = Lab::new();
        let dial: Handle<Dial> = lab.add_configured("dial", 7);
        assert_eq!(dial.borrow().level, 7);
        assert_eq!(lab.label(dial.id()), Some("dial"));
    }

    #[test]
    fn rewiring_replaces_previous_inputs() {
        let mut lab = Lab::new();
        let a = lab.add("a", Probe::default());
        let b = lab.add("b", Probe::default());
        lab.connect(&b, &[a.id()], |_| {}).unwrap();
        lab.connect(&b, &[], |_| {}).unwrap();
        // With b detached, a may now take b as its input.
        lab.connect(&a, &[b.id()], |_| {}).unwrap();
    }

    #[test]
    fn clock_links_do_not_count_as_data_edges() {
        let mut lab = Lab::new();
        let generator = lab.add("gen", Probe::default());
        let scope = lab.add("scope", Probe::default());
        lab.connect(&scope, &[generator.id()], |_| {}).unwrap();
        lab.sync(&generator, scope.id(), |p| p.wired += 1).unwrap();
        assert_eq!(generator.borrow().wired, 1);
    }

    #[test]
    fn weak_links_stay_alive_while_lab_owns_nodes() {
        struct Dark;
        impl OpticalNode for Dark {
            fn output_opt_signal(&mut self) -> crate::lab::OpticalSignal {
                crate::lab::OpticalSignal::default()
            }
        }
        let mut lab = Lab::new();
        let link = {
            let handle = lab.add("dark", Dark);
            handle.optical()
        };
        assert!(link.upgrade().is_some());
        drop(lab);
        assert!(link.upgrade().is_none());
    }
}
