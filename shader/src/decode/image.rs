//! Surface (storage image) loads, stores and atomics.

use crate::inst::{AtomicOp, ImageType, Instruction, Register};
use crate::node::{Meta, MetaImage, Node, NodeBlock, OperationCode};
use crate::node_helper::operation_meta;
use crate::opcode::OpId;
use crate::shader_ir::ShaderIr;

fn image_coord_count(image_type: ImageType) -> usize {
    match image_type {
        ImageType::Texture1D | ImageType::TextureBuffer => 1,
        ImageType::Texture1DArray | ImageType::Texture2D => 2,
        ImageType::Texture2DArray | ImageType::Texture3D => 3,
    }
}

fn image_atomic_code(op: AtomicOp) -> OperationCode {
    match op {
        AtomicOp::And => OperationCode::AtomicImageAnd,
        AtomicOp::Or => OperationCode::AtomicImageOr,
        AtomicOp::Xor => OperationCode::AtomicImageXor,
        AtomicOp::Exch => OperationCode::AtomicImageExchange,
        _ => OperationCode::AtomicImageAdd,
    }
}

impl<'r> ShaderIr<'r> {
    fn image_coordinates(&mut self, instr: Instruction, image_type: ImageType) -> Vec<Node> {
        let count = image_coord_count(image_type);
        let mut coords = Vec::with_capacity(count);
        for i in 0..count {
            let reg = self.get_register(Register(instr.gpr8().0 + i as u32));
            coords.push(reg);
        }
        coords
    }

    pub(crate) fn decode_image(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        match matcher.id() {
            OpId::SULD => {
                let suldst = instr.suldst();
                let image_type = suldst.image_type().unwrap_or(ImageType::Texture2D);
                let coords = self.image_coordinates(instr, image_type);
                let image_index = if suldst.is_immediate() {
                    self.get_image(instr.image().index() as u32, image_type)
                } else {
                    match self.get_bindless_image(instr.gpr39(), image_type) {
                        Some(index) => index,
                        None => {
                            warn!("Bindless image tracking failed");
                            return pc;
                        }
                    }
                };
                self.used_images[image_index].mark_read();
                let image = self.used_images[image_index].clone();

                if suldst.mode_ba() {
                    warn!("SULD.D.BA is not implemented");
                    return pc;
                }
                let mut dest_elem = 0u32;
                for element in 0..4u32 {
                    if !suldst.is_component_enabled(element as usize) {
                        continue;
                    }
                    let meta = Meta::Image(MetaImage {
                        image: image.clone(),
                        values: Vec::new(),
                        element,
                    });
                    let value =
                        operation_meta(OperationCode::ImageLoad, meta, coords.clone());
                    self.set_temporary(bb, dest_elem, value);
                    dest_elem += 1;
                }
                for i in 0..dest_elem {
                    let tmp = self.get_temporary(i);
                    self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
                }
            }
            OpId::SUST => {
                let suldst = instr.suldst();
                let image_type = suldst.image_type().unwrap_or(ImageType::Texture2D);
                let coords = self.image_coordinates(instr, image_type);
                let image_index = if suldst.is_immediate() {
                    self.get_image(instr.image().index() as u32, image_type)
                } else {
                    match self.get_bindless_image(instr.gpr39(), image_type) {
                        Some(index) => index,
                        None => {
                            warn!("Bindless image tracking failed");
                            return pc;
                        }
                    }
                };
                self.used_images[image_index].mark_write();
                let image = self.used_images[image_index].clone();

                let mut values = Vec::with_capacity(4);
                for element in 0..4u32 {
                    if !suldst.is_component_enabled(element as usize) {
                        continue;
                    }
                    let value = self.get_register(Register(instr.gpr0().0 + element));
                    values.push(value);
                }
                let meta = Meta::Image(MetaImage {
                    image,
                    values,
                    element: 0,
                });
                bb.push(operation_meta(OperationCode::ImageStore, meta, coords));
            }
            OpId::SUATOM => {
                let suatom = instr.suatom_d();
                let image_type = suatom.image_type().unwrap_or(ImageType::Texture2D);
                let coords = self.image_coordinates(instr, image_type);
                let image_index = self.get_image(instr.image().index() as u32, image_type);
                self.used_images[image_index].mark_atomic();
                let image = self.used_images[image_index].clone();

                let data = self.get_register(instr.gpr0());
                let meta = Meta::Image(MetaImage {
                    image,
                    values: vec![data],
                    element: 0,
                });
                let op = suatom.operation().unwrap_or(AtomicOp::Add);
                let value = operation_meta(image_atomic_code(op), meta, coords);
                self.set_register(bb, instr.gpr0(), value);
            }
            _ => {
                warn!("Unhandled image instruction: {}", matcher.name());
            }
        }
        pc
    }
}
