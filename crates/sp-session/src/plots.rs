use std::fmt;

use serde::{Deserialize, Serialize};
use sp_shift::{AxisPair, PlotSpec};
use sp_types::DataTypeClass;

use crate::SessionError;

/// Stable handle to a plot; survives reordering and removal of others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlotId(u64);

impl PlotId {
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotEntry {
    pub id: PlotId,
    pub label: String,
    pub spec: PlotSpec,
}

/// Ordered set of plot specs, as the analyst arranged them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlotSpecManager {
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    plots: Vec<PlotEntry>,
}

impl PlotSpecManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, label: impl Into<String>, spec: PlotSpec) -> PlotId {
        // Hand-edited files may carry ids at or beyond `next_id`.
        let floor = self
            .plots
            .iter()
            .map(|entry| entry.id.0 + 1)
            .max()
            .unwrap_or(0);
        let id = PlotId(self.next_id.max(floor));
        self.next_id = id.0 + 1;
        self.plots.push(PlotEntry {
            id,
            label: label.into(),
            spec,
        });
        id
    }

    pub fn remove(&mut self, id: PlotId) -> Result<PlotEntry, SessionError> {
        let idx = self.position(id)?;
        Ok(self.plots.remove(idx))
    }

    /// Replaces the spec of `id`, keeping its label and position.
    pub fn update(&mut self, id: PlotId, spec: PlotSpec) -> Result<PlotSpec, SessionError> {
        let idx = self.position(id)?;
        Ok(std::mem::replace(&mut self.plots[idx].spec, spec))
    }

    pub fn relabel(&mut self, id: PlotId, label: impl Into<String>) -> Result<(), SessionError> {
        let idx = self.position(id)?;
        self.plots[idx].label = label.into();
        Ok(())
    }

    /// Adds a pair to an existing plot, subject to the per-plot pair limit.
    pub fn add_pair(&mut self, id: PlotId, pair: AxisPair) -> Result<(), SessionError> {
        let idx = self.position(id)?;
        self.plots[idx].spec.push_pair(pair)?;
        Ok(())
    }

    /// Moves `id` to `index`, clamped to the end of the list.
    pub fn move_to(&mut self, id: PlotId, index: usize) -> Result<(), SessionError> {
        let idx = self.position(id)?;
        let entry = self.plots.remove(idx);
        let index = index.min(self.plots.len());
        self.plots.insert(index, entry);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: PlotId) -> Option<&PlotEntry> {
        self.plots.iter().find(|entry| entry.id == id)
    }

    #[must_use]
    pub fn entries(&self) -> &[PlotEntry] {
        &self.plots
    }

    pub fn specs(&self) -> impl Iterator<Item = &PlotSpec> {
        self.plots.iter().map(|entry| &entry.spec)
    }

    /// Classes drawn by at least one plot, in class order.
    #[must_use]
    pub fn classes(&self) -> Vec<DataTypeClass> {
        DataTypeClass::ALL
            .into_iter()
            .filter(|class| self.specs().any(|spec| spec.class == *class))
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plots.is_empty()
    }

    fn position(&self, id: PlotId) -> Result<usize, SessionError> {
        self.plots
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(SessionError::UnknownPlot(id))
    }
}

#[cfg(test)]
mod tests {
    use sp_shift::{AxisPair, PlotSpec, SigmaCutoff};
    use sp_types::DataTypeClass;

    use super::PlotSpecManager;
    use crate::SessionError;

    fn spec(class: DataTypeClass) -> PlotSpec {
        PlotSpec::new(class, vec![AxisPair::new("n1", "egt")], SigmaCutoff::default())
            .expect("spec")
    }

    #[test]
    fn ids_stay_stable_across_removal_and_moves() {
        let mut plots = PlotSpecManager::new();
        let a = plots.add("EGT", spec(DataTypeClass::Raw));
        let b = plots.add("Fuel", spec(DataTypeClass::Processed));
        let c = plots.add("Vib", spec(DataTypeClass::Raw));

        plots.move_to(c, 0).expect("move");
        plots.remove(a).expect("remove");
        let d = plots.add("Oil", spec(DataTypeClass::Profile));

        let order = plots.entries().iter().map(|entry| entry.id).collect::<Vec<_>>();
        assert_eq!(order, vec![c, b, d]);
        assert_ne!(d, a);
        assert_eq!(plots.get(b).map(|entry| entry.label.as_str()), Some("Fuel"));
        assert!(matches!(plots.remove(a), Err(SessionError::UnknownPlot(id)) if id == a));
    }

    #[test]
    fn move_clamps_and_update_keeps_position() {
        let mut plots = PlotSpecManager::new();
        let a = plots.add("a", spec(DataTypeClass::Raw));
        let b = plots.add("b", spec(DataTypeClass::Raw));
        plots.move_to(a, 99).expect("move");
        assert_eq!(plots.entries()[1].id, a);

        let old = plots.update(b, spec(DataTypeClass::Source)).expect("update");
        assert_eq!(old.class, DataTypeClass::Raw);
        assert_eq!(plots.entries()[0].spec.class, DataTypeClass::Source);
        assert_eq!(plots.classes(), vec![DataTypeClass::Raw, DataTypeClass::Source]);
    }

    #[test]
    fn pair_limit_is_enforced_through_the_manager() {
        let mut plots = PlotSpecManager::new();
        let id = plots.add("busy", spec(DataTypeClass::Raw));
        for y in ["a", "b", "c"] {
            plots.add_pair(id, AxisPair::new("n1", y)).expect("within limit");
        }
        assert!(matches!(
            plots.add_pair(id, AxisPair::new("n1", "d")),
            Err(SessionError::Plot(_))
        ));
    }

    #[test]
    fn serialized_manager_keeps_allocating_fresh_ids() {
        let mut plots = PlotSpecManager::new();
        let a = plots.add("a", spec(DataTypeClass::Raw));
        let json = serde_json::to_string(&plots).expect("encode");
        let mut restored: PlotSpecManager = serde_json::from_str(&json).expect("decode");
        assert_eq!(restored, plots);
        assert_ne!(restored.add("b", spec(DataTypeClass::Raw)), a);
    }
}
