//! SPIR-V module assembly.
//!
//! A thin word-stream builder: sections are plain `Vec<u32>` in layout
//! order, types and constants are cached by value, and instructions are
//! encoded with the standard `(word_count << 16) | opcode` header word.

use fxhash::FxHashMap;
use spirv_headers::{
    AddressingModel, Capability, Decoration, ExecutionMode, ExecutionModel, MemoryModel, Op,
    StorageClass,
};

pub const MAGIC: u32 = 0x0723_0203;

/// Structural type key. Image types are cached separately.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Type {
    Void,
    Bool,
    Bool2,
    Float,
    Uint,
    Sint,
    Vector(Box<Type>, u32),
    Pointer(StorageClass, Box<Type>),
    Array(Box<Type>, u32),
    RuntimeArray(Box<Type>),
    Function(Box<Type>),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct ImageTypeKey {
    pub dim: spirv_headers::Dim,
    pub depth: bool,
    pub arrayed: bool,
    pub sampled: bool,
}

pub struct ModuleBuilder {
    bound: u32,
    version: u32,
    capabilities: Vec<Capability>,
    extensions: Vec<&'static str>,
    glsl_std450: u32,
    execution_model: ExecutionModel,
    entry_interface: Vec<u32>,
    execution_modes: Vec<u32>,
    pub decorations: Vec<u32>,
    pub globals: Vec<u32>,
    pub code: Vec<u32>,
    types: FxHashMap<Type, u32>,
    constants: FxHashMap<(Type, u32), u32>,
    image_types: FxHashMap<ImageTypeKey, u32>,
    sampled_image_types: FxHashMap<u32, u32>,
    raw_pointer_types: FxHashMap<(StorageClass, u32), u32>,
    main_id: u32,
}

pub fn encode(out: &mut Vec<u32>, op: Op, operands: &[u32]) {
    out.push(((operands.len() as u32 + 1) << 16) | op as u32);
    out.extend_from_slice(operands);
}

impl ModuleBuilder {
    pub fn new(version: u32, execution_model: ExecutionModel) -> ModuleBuilder {
        let mut builder = ModuleBuilder {
            bound: 1,
            version,
            capabilities: vec![Capability::Shader],
            extensions: Vec::new(),
            glsl_std450: 0,
            execution_model,
            entry_interface: Vec::new(),
            execution_modes: Vec::new(),
            decorations: Vec::new(),
            globals: Vec::new(),
            code: Vec::new(),
            types: FxHashMap::default(),
            constants: FxHashMap::default(),
            image_types: FxHashMap::default(),
            sampled_image_types: FxHashMap::default(),
            raw_pointer_types: FxHashMap::default(),
            main_id: 0,
        };
        builder.glsl_std450 = builder.allocate_id();
        builder.main_id = builder.allocate_id();
        builder
    }

    pub fn allocate_id(&mut self) -> u32 {
        let id = self.bound;
        self.bound += 1;
        id
    }

    pub fn main_id(&self) -> u32 {
        self.main_id
    }

    pub fn glsl_std450(&self) -> u32 {
        self.glsl_std450
    }

    pub fn add_capability(&mut self, capability: Capability) {
        if !self.capabilities.contains(&capability) {
            self.capabilities.push(capability);
        }
    }

    pub fn add_extension(&mut self, extension: &'static str) {
        if !self.extensions.contains(&extension) {
            self.extensions.push(extension);
        }
    }

    pub fn add_interface(&mut self, id: u32) {
        self.entry_interface.push(id);
    }

    pub fn add_execution_mode(&mut self, mode: ExecutionMode, literals: &[u32]) {
        let mut operands = vec![self.main_id, mode as u32];
        operands.extend_from_slice(literals);
        encode(&mut self.execution_modes, Op::ExecutionMode, &operands);
    }

    pub fn decorate(&mut self, target: u32, decoration: Decoration, literals: &[u32]) {
        let mut operands = vec![target, decoration as u32];
        operands.extend_from_slice(literals);
        let mut words = Vec::new();
        encode(&mut words, Op::Decorate, &operands);
        self.decorations.extend_from_slice(&words);
    }

    pub fn member_decorate(
        &mut self,
        target: u32,
        member: u32,
        decoration: Decoration,
        literals: &[u32],
    ) {
        let mut operands = vec![target, member, decoration as u32];
        operands.extend_from_slice(literals);
        let mut words = Vec::new();
        encode(&mut words, Op::MemberDecorate, &operands);
        self.decorations.extend_from_slice(&words);
    }

    pub fn type_id(&mut self, ty: Type) -> u32 {
        if let Some(&id) = self.types.get(&ty) {
            return id;
        }
        // Pointers share the raw-id pointer cache so a pointee is never
        // pointed to by two distinct pointer types.
        if let Type::Pointer(class, pointee) = &ty {
            let pointee_id = self.type_id((**pointee).clone());
            let id = self.pointer_to(*class, pointee_id);
            self.types.insert(ty, id);
            return id;
        }
        let id = self.allocate_id();
        match &ty {
            Type::Void => encode(&mut self.globals, Op::TypeVoid, &[id]),
            Type::Bool => encode(&mut self.globals, Op::TypeBool, &[id]),
            Type::Bool2 => {
                let bool_id = self.type_id(Type::Bool);
                encode(&mut self.globals, Op::TypeVector, &[id, bool_id, 2]);
            }
            Type::Float => encode(&mut self.globals, Op::TypeFloat, &[id, 32]),
            Type::Uint => encode(&mut self.globals, Op::TypeInt, &[id, 32, 0]),
            Type::Sint => encode(&mut self.globals, Op::TypeInt, &[id, 32, 1]),
            Type::Vector(component, size) => {
                let component_id = self.type_id((**component).clone());
                encode(
                    &mut self.globals,
                    Op::TypeVector,
                    &[id, component_id, *size],
                );
            }
            Type::Pointer(..) => unreachable!("handled above"),
            Type::Array(element, size) => {
                let element_id = self.type_id((**element).clone());
                let length = self.const_u32(*size);
                encode(&mut self.globals, Op::TypeArray, &[id, element_id, length]);
            }
            Type::RuntimeArray(element) => {
                let element_id = self.type_id((**element).clone());
                encode(&mut self.globals, Op::TypeRuntimeArray, &[id, element_id]);
            }
            Type::Function(ret) => {
                let ret_id = self.type_id((**ret).clone());
                encode(&mut self.globals, Op::TypeFunction, &[id, ret_id]);
            }
        }
        self.types.insert(ty, id);
        id
    }

    pub fn image_type(&mut self, key: ImageTypeKey) -> u32 {
        if let Some(&id) = self.image_types.get(&key) {
            return id;
        }
        let float_id = self.type_id(Type::Float);
        let id = self.allocate_id();
        encode(
            &mut self.globals,
            Op::TypeImage,
            &[
                id,
                float_id,
                key.dim as u32,
                key.depth as u32,
                key.arrayed as u32,
                0,
                if key.sampled { 1 } else { 2 },
                spirv_headers::ImageFormat::Unknown as u32,
            ],
        );
        self.image_types.insert(key, id);
        id
    }

    /// Pointer to a type identified by raw id. Pointer types are
    /// non-aggregate and must not be redeclared.
    pub fn pointer_to(&mut self, class: StorageClass, pointee: u32) -> u32 {
        if let Some(&id) = self.raw_pointer_types.get(&(class, pointee)) {
            return id;
        }
        let id = self.allocate_id();
        encode(
            &mut self.globals,
            Op::TypePointer,
            &[id, class as u32, pointee],
        );
        self.raw_pointer_types.insert((class, pointee), id);
        id
    }

    /// Declares a global variable of a raw-id type.
    pub fn raw_variable(&mut self, class: StorageClass, pointee: u32) -> u32 {
        let pointer = self.pointer_to(class, pointee);
        let id = self.allocate_id();
        encode(
            &mut self.globals,
            Op::Variable,
            &[pointer, id, class as u32],
        );
        id
    }

    pub fn sampled_image_type(&mut self, image_type: u32) -> u32 {
        if let Some(&id) = self.sampled_image_types.get(&image_type) {
            return id;
        }
        let id = self.allocate_id();
        encode(&mut self.globals, Op::TypeSampledImage, &[id, image_type]);
        self.sampled_image_types.insert(image_type, id);
        id
    }

    fn typed_constant(&mut self, ty: Type, bits: u32) -> u32 {
        if let Some(&id) = self.constants.get(&(ty.clone(), bits)) {
            return id;
        }
        let type_id = self.type_id(ty.clone());
        let id = self.allocate_id();
        encode(&mut self.globals, Op::Constant, &[type_id, id, bits]);
        self.constants.insert((ty, bits), id);
        id
    }

    pub fn const_u32(&mut self, value: u32) -> u32 {
        self.typed_constant(Type::Uint, value)
    }

    pub fn const_s32(&mut self, value: i32) -> u32 {
        self.typed_constant(Type::Sint, value as u32)
    }

    pub fn const_f32(&mut self, value: f32) -> u32 {
        self.typed_constant(Type::Float, value.to_bits())
    }

    pub fn const_bool(&mut self, value: bool) -> u32 {
        let key = (Type::Bool, value as u32);
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let type_id = self.type_id(Type::Bool);
        let id = self.allocate_id();
        let op = if value { Op::ConstantTrue } else { Op::ConstantFalse };
        encode(&mut self.globals, op, &[type_id, id]);
        self.constants.insert(key, id);
        id
    }

    /// Declares a global variable of the given pointee type.
    pub fn variable(&mut self, class: StorageClass, pointee: Type) -> u32 {
        let pointer = self.type_id(Type::Pointer(class, Box::new(pointee)));
        let id = self.allocate_id();
        encode(
            &mut self.globals,
            Op::Variable,
            &[pointer, id, class as u32],
        );
        id
    }

    pub fn variable_init(&mut self, class: StorageClass, pointee: Type, initializer: u32) -> u32 {
        let pointer = self.type_id(Type::Pointer(class, Box::new(pointee)));
        let id = self.allocate_id();
        encode(
            &mut self.globals,
            Op::Variable,
            &[pointer, id, class as u32, initializer],
        );
        id
    }

    /// Emits a result-producing instruction into the function body.
    pub fn op(&mut self, op: Op, result_type: u32, operands: &[u32]) -> u32 {
        let id = self.allocate_id();
        let mut words = vec![result_type, id];
        words.extend_from_slice(operands);
        encode(&mut self.code, op, &words);
        id
    }

    /// Emits a void instruction into the function body.
    pub fn op_void(&mut self, op: Op, operands: &[u32]) {
        encode(&mut self.code, op, operands);
    }

    /// GLSL.std.450 extended instruction.
    pub fn ext_inst(&mut self, result_type: u32, inst: u32, operands: &[u32]) -> u32 {
        let id = self.allocate_id();
        let mut words = vec![result_type, id, self.glsl_std450, inst];
        words.extend_from_slice(operands);
        encode(&mut self.code, Op::ExtInst, &words);
        id
    }

    pub fn label(&mut self, id: u32) {
        let mut words = Vec::new();
        encode(&mut words, Op::Label, &[id]);
        self.code.extend_from_slice(&words);
    }

    /// Assembles the final word stream.
    pub fn assemble(mut self, entry_name: &str) -> Vec<u32> {
        // Resolve the function types first so every declaration lands in
        // the globals section before it is flushed.
        let void_id = self.type_id(Type::Void);
        let fn_type = self.type_id(Type::Function(Box::new(Type::Void)));

        let mut out = Vec::new();
        out.push(MAGIC);
        out.push(self.version);
        out.push(0); // generator
        out.push(self.bound);
        out.push(0); // schema

        for capability in &self.capabilities {
            encode(&mut out, Op::Capability, &[*capability as u32]);
        }
        for extension in &self.extensions {
            let mut operands = Vec::new();
            push_string(&mut operands, extension);
            encode(&mut out, Op::Extension, &operands);
        }
        {
            let mut operands = vec![self.glsl_std450];
            push_string(&mut operands, "GLSL.std.450");
            encode(&mut out, Op::ExtInstImport, &operands);
        }
        encode(
            &mut out,
            Op::MemoryModel,
            &[AddressingModel::Logical as u32, MemoryModel::GLSL450 as u32],
        );
        {
            let mut operands = vec![self.execution_model as u32, self.main_id];
            push_string(&mut operands, entry_name);
            operands.extend_from_slice(&self.entry_interface);
            encode(&mut out, Op::EntryPoint, &operands);
        }
        out.extend_from_slice(&self.execution_modes);
        out.extend_from_slice(&self.decorations);
        out.extend_from_slice(&self.globals);

        encode(&mut out, Op::Function, &[void_id, self.main_id, 0, fn_type]);
        out.extend_from_slice(&self.code);
        encode(&mut out, Op::FunctionEnd, &[]);
        out
    }
}

pub fn push_string(out: &mut Vec<u32>, value: &str) {
    let bytes = value.as_bytes();
    let mut word = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        word |= u32::from(byte) << ((i % 4) * 8);
        if i % 4 == 3 {
            out.push(word);
            word = 0;
        }
    }
    // Null terminator, padding to a word boundary.
    out.push(word);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_and_entry_point() {
        let mut builder = ModuleBuilder::new(0x0001_0300, ExecutionModel::GLCompute);
        let void = builder.type_id(Type::Void);
        let _ = void;
        let entry = builder.allocate_id();
        builder.label(entry);
        builder.op_void(Op::Return, &[]);
        let words = builder.assemble("main");
        assert_eq!(words[0], MAGIC);
        assert_eq!(words[1], 0x0001_0300);
        // Capability Shader must be the first instruction.
        let inst = words[5];
        assert_eq!(inst & 0xFFFF, Op::Capability as u32);
    }

    #[test]
    fn type_and_constant_deduplication() {
        let mut builder = ModuleBuilder::new(0x0001_0000, ExecutionModel::Vertex);
        let a = builder.type_id(Type::Uint);
        let b = builder.type_id(Type::Uint);
        assert_eq!(a, b);
        let c1 = builder.const_u32(42);
        let c2 = builder.const_u32(42);
        assert_eq!(c1, c2);
        let c3 = builder.const_u32(43);
        assert_ne!(c1, c3);
    }

    #[test]
    fn string_padding() {
        let mut out = Vec::new();
        push_string(&mut out, "main");
        // "main" is exactly four bytes; the terminator word follows.
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], u32::from_le_bytes(*b"main"));
        assert_eq!(out[1], 0);
    }
}
