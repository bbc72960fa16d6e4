//! Field id to module-list dispatch table.

use super::TraceModule;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;

/// Maps each payload field id to the ordered list of interested modules.
///
/// Built once at pipeline construction and passed by reference to both the
/// tokenizer and parser drivers. The same table serves both phases; only
/// the dispatch policy differs (stop-on-first vs fan-out).
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Rc<RefCell<dyn TraceModule>>>,
    by_field: Vec<SmallVec<[usize; 2]>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a module to the dispatch list of every field it declares.
    pub fn register(&mut self, module: Rc<RefCell<dyn TraceModule>>) {
        let index = self.modules.len();
        let fields: SmallVec<[u32; 4]> =
            SmallVec::from_slice(module.borrow().registered_fields());
        self.modules.push(module);
        for field_id in fields {
            self.register_for_field(field_id, index);
        }
    }

    fn register_for_field(&mut self, field_id: u32, module_index: usize) {
        let slot = field_id as usize;
        if slot >= self.by_field.len() {
            self.by_field.resize_with(slot + 1, SmallVec::new);
        }
        self.by_field[slot].push(module_index);
    }

    /// Module indices registered for a field, in registration order.
    pub fn modules_for_field(&self, field_id: u32) -> &[usize] {
        self.by_field
            .get(field_id as usize)
            .map(|list| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn module(&self, index: usize) -> Rc<RefCell<dyn TraceModule>> {
        Rc::clone(&self.modules[index])
    }

    /// Every registered module, for lifecycle broadcasts.
    pub fn all_modules(&self) -> impl Iterator<Item = Rc<RefCell<dyn TraceModule>>> + '_ {
        self.modules.iter().map(Rc::clone)
    }

    pub fn module_count(&self) -> usize {
        self.modules.len()
    }
}
