use core::ffi::c_void;
use core::fmt;
use std::ffi::CString;

use hashbrown::{HashMap, HashSet};

use crate::{
    types::{Type, TypeTable},
    vm::{Instruction, Value, instruction_set::Shape},
};

/// Index of a bytecode unit within its [`Program`]; fits the Bx field of `call`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnitId(pub u16);

/// One compiled function. Immutable once the compiler hands it over.
pub struct Bytecode {
    pub name: String,
    pub params: Vec<String>,
    pub return_type: Type,
    /// Register window size: the highest slot count ever live at once.
    pub stack_size: usize,
    pub instructions: Vec<Instruction>,
    pub constants: Vec<Value>,
}

/// A host function the program may call through the foreign-call bridge.
#[derive(Debug, Clone)]
pub struct NativeSymbol {
    pub name: String,
    pub address: *const c_void,
}

/// Every unit produced by one compilation, plus the data they refer to.
///
/// String constants are stored as pointers to the NUL-terminated buffers held
/// in `strings`, so those buffers must outlive any VM running this program;
/// owning them here ties both lifetimes together.
pub struct Program {
    pub(crate) units: Vec<Bytecode>,
    pub(crate) entry: UnitId,
    pub(crate) natives: Vec<NativeSymbol>,
    pub(crate) types: TypeTable,
    pub(crate) strings: Vec<CString>,
}

impl Program {
    pub fn entry(&self) -> UnitId {
        self.entry
    }

    pub fn unit(&self, id: UnitId) -> &Bytecode {
        &self.units[id.0 as usize]
    }

    pub fn units(&self) -> &[Bytecode] {
        &self.units
    }

    /// Looks a unit up by function name (the entry unit is `main`). When a
    /// name was declared more than once, the latest declaration wins, as it
    /// does for calls compiled after it.
    pub fn find(&self, name: &str) -> Option<UnitId> {
        self.units
            .iter()
            .rposition(|unit| unit.name == name)
            .map(|index| UnitId(index as u16))
    }

    pub fn natives(&self) -> &[NativeSymbol] {
        &self.natives
    }

    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    pub fn strings(&self) -> &[CString] {
        &self.strings
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for unit in &self.units {
            writeln!(f, "{:?}", unit)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Bytecode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "function {}(", self.name)?;
        for i in 0..self.params.len() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "%{}", i)?;
        }
        writeln!(f, "): {}", self.return_type)?;
        writeln!(f, ".stack_size {}", self.stack_size)?;

        for (i, constant) in self.constants.iter().enumerate() {
            writeln!(f, ".const {} = {:?}", i, constant)?;
        }

        // First pass: collect all jump targets to determine which addresses need labels
        let jump_targets: HashSet<usize> = self
            .instructions
            .iter()
            .filter(|instr| matches!(instr.opcode().map(|op| op.shape()), Ok(Shape::SAx)))
            .map(|instr| instr.sax_field() as usize)
            .collect();

        // Assign label numbers to targets (sorted for deterministic output)
        let mut sorted_targets: Vec<_> = jump_targets.into_iter().collect();
        sorted_targets.sort();
        let label_map: HashMap<usize, usize> = sorted_targets
            .into_iter()
            .enumerate()
            .map(|(i, addr)| (addr, i))
            .collect();

        // Second pass: print instructions with labels
        for (addr, instr) in self.instructions.iter().enumerate() {
            let label_prefix = label_map
                .get(&addr)
                .map(|label| format!("L{}:", label))
                .unwrap_or_default();

            if matches!(instr.opcode().map(|op| op.shape()), Ok(Shape::SAx)) {
                let target = instr.sax_field() as usize;
                let target_label = label_map
                    .get(&target)
                    .map(|label| format!("L{}", label))
                    .unwrap_or_else(|| format!("@{}", target));
                writeln!(
                    f,
                    "{:4} {:>4}  {:?} (to {})",
                    addr, label_prefix, instr, target_label
                )?;
            } else {
                writeln!(f, "{:4} {:>4}  {:?}", addr, label_prefix, instr)?;
            }
        }
        // Labels may point one past the last instruction (a fallthrough exit).
        if let Some(label) = label_map.get(&self.instructions.len()) {
            writeln!(f, "{:4} {:>4}", self.instructions.len(), format!("L{}:", label))?;
        }
        Ok(())
    }
}
