//! Static types attached to slots at compile time.
//!
//! Values in the VM carry no tag, so the only thing that decides how a register
//! cell is interpreted is the [`Type`] the compiler recorded for its slot.
//! Function and struct payloads live in a [`TypeTable`] and are referenced by
//! index, which keeps `Type` small and `Copy`.

use core::fmt;

use hashbrown::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W8,
    W16,
    W32,
    W64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatWidth {
    W32,
    W64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Bool,
    Int(IntWidth),
    Float(FloatWidth),
    Pointer,
    String,
    Function(FunctionId),
    Struct(StructId),
}

/// How an operand participates in arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericClass {
    Integer,
    Float,
}

/// Primitive kinds that can cross the foreign-call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Pointer,
}

impl Type {
    pub const INT: Type = Type::Int(IntWidth::W64);
    pub const FLOAT: Type = Type::Float(FloatWidth::W64);

    /// Resolves a primitive type name used in annotations.
    pub fn primitive(name: &str) -> Option<Type> {
        Some(match name {
            "void" => Type::Void,
            "bool" => Type::Bool,
            "int" | "i64" => Type::Int(IntWidth::W64),
            "i32" => Type::Int(IntWidth::W32),
            "i16" => Type::Int(IntWidth::W16),
            "i8" => Type::Int(IntWidth::W8),
            "float" | "f64" => Type::Float(FloatWidth::W64),
            "f32" => Type::Float(FloatWidth::W32),
            "ptr" => Type::Pointer,
            "string" => Type::String,
            _ => return None,
        })
    }

    /// Integer cells hold sign-extended i64, float cells hold f64, whatever the
    /// declared width.
    pub fn numeric_class(self) -> Option<NumericClass> {
        match self {
            Type::Int(_) => Some(NumericClass::Integer),
            Type::Float(_) => Some(NumericClass::Float),
            _ => None,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Whether a value of type `other` may be stored where `self` is expected.
    ///
    /// Widths within one numeric class are interchangeable because the cell
    /// representation is the same; narrowing happens only at the native boundary.
    pub fn accepts(self, other: Type) -> bool {
        match (self, other) {
            (Type::Int(_), Type::Int(_)) => true,
            (Type::Float(_), Type::Float(_)) => true,
            (Type::Pointer, Type::String) => true,
            (a, b) => a == b,
        }
    }

    pub fn native_kind(self) -> Option<NativeKind> {
        match self {
            Type::Bool | Type::Int(IntWidth::W8) => Some(NativeKind::I8),
            Type::Int(IntWidth::W16) => Some(NativeKind::I16),
            Type::Int(IntWidth::W32) => Some(NativeKind::I32),
            Type::Int(IntWidth::W64) => Some(NativeKind::I64),
            Type::Float(FloatWidth::W32) => Some(NativeKind::F32),
            Type::Float(FloatWidth::W64) => Some(NativeKind::F64),
            Type::Pointer | Type::String => Some(NativeKind::Pointer),
            Type::Void | Type::Function(_) | Type::Struct(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Bool => write!(f, "bool"),
            Type::Int(IntWidth::W8) => write!(f, "i8"),
            Type::Int(IntWidth::W16) => write!(f, "i16"),
            Type::Int(IntWidth::W32) => write!(f, "i32"),
            Type::Int(IntWidth::W64) => write!(f, "int"),
            Type::Float(FloatWidth::W32) => write!(f, "f32"),
            Type::Float(FloatWidth::W64) => write!(f, "float"),
            Type::Pointer => write!(f, "ptr"),
            Type::String => write!(f, "string"),
            Type::Function(id) => write!(f, "fn#{}", id.0),
            Type::Struct(id) => write!(f, "struct#{}", id.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub name: String,
    pub fields: Vec<(String, Type)>,
}

/// Owns function signatures and struct declarations for one compilation.
///
/// Function types are interned, so two declarations with the same signature
/// share a `FunctionId` and compare equal as `Type`s.
#[derive(Debug, Default)]
pub struct TypeTable {
    functions: Vec<FunctionType>,
    function_ids: HashMap<FunctionType, FunctionId>,
    structs: Vec<StructType>,
    struct_ids: HashMap<String, StructId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function(&mut self, params: Vec<Type>, ret: Type) -> FunctionId {
        let signature = FunctionType { params, ret };
        if let Some(&id) = self.function_ids.get(&signature) {
            return id;
        }
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(signature.clone());
        self.function_ids.insert(signature, id);
        id
    }

    pub fn function_type(&self, id: FunctionId) -> &FunctionType {
        &self.functions[id.0 as usize]
    }

    /// Registers a struct. Redeclaring a name replaces the lookup entry but the
    /// old id stays valid.
    pub fn declare_struct(&mut self, name: &str, fields: Vec<(String, Type)>) -> Type {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructType {
            name: name.to_owned(),
            fields,
        });
        self.struct_ids.insert(name.to_owned(), id);
        Type::Struct(id)
    }

    pub fn struct_type(&self, id: StructId) -> &StructType {
        &self.structs[id.0 as usize]
    }

    /// Resolves a type name: primitives first, then declared structs.
    pub fn lookup(&self, name: &str) -> Option<Type> {
        Type::primitive(name).or_else(|| self.struct_ids.get(name).map(|&id| Type::Struct(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_types_are_interned() {
        let mut table = TypeTable::new();
        let a = table.function(vec![Type::INT, Type::Bool], Type::Void);
        let b = table.function(vec![Type::INT, Type::Bool], Type::Void);
        let c = table.function(vec![Type::INT], Type::Void);
        assert_eq!(Type::Function(a), Type::Function(b));
        assert_ne!(a, c);
        assert_eq!(table.function_type(c).params, vec![Type::INT]);
    }

    #[test]
    fn test_lookup_prefers_primitives_then_structs() {
        let mut table = TypeTable::new();
        let point = table.declare_struct("Point", vec![("x".into(), Type::INT)]);
        assert_eq!(table.lookup("i32"), Some(Type::Int(IntWidth::W32)));
        assert_eq!(table.lookup("Point"), Some(point));
        assert_eq!(table.lookup("Nope"), None);
    }

    #[test]
    fn test_native_kinds() {
        assert_eq!(Type::Int(IntWidth::W32).native_kind(), Some(NativeKind::I32));
        assert_eq!(Type::String.native_kind(), Some(NativeKind::Pointer));
        assert_eq!(Type::Void.native_kind(), None);
    }

    #[test]
    fn test_accepts_within_numeric_class() {
        assert!(Type::Int(IntWidth::W8).accepts(Type::INT));
        assert!(Type::Pointer.accepts(Type::String));
        assert!(!Type::INT.accepts(Type::FLOAT));
        assert!(!Type::String.accepts(Type::Pointer));
    }
}
