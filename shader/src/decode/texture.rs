//! Texture sampling, fetching, gathering and queries.

use crate::inst::{
    Instruction, Register, TextureMiscMode, TextureProcessMode, TextureQueryType, TextureType,
};
use crate::node::{Meta, MetaTexture, Node, NodeBlock, OperationCode, Sampler};
use crate::node_helper::{immediate_f32, immediate_s32, immediate_u32, operation, operation_meta};
use crate::opcode::OpId;
use crate::shader_ir::{bitfield_extract, SamplerInfo, ShaderIr};

fn coord_count(texture_type: TextureType) -> usize {
    match texture_type {
        TextureType::Texture1D => 1,
        TextureType::Texture2D => 2,
        TextureType::Texture3D | TextureType::TextureCube => 3,
    }
}

fn zero4() -> [Node; 4] {
    [
        immediate_u32(0),
        immediate_u32(0),
        immediate_u32(0),
        immediate_u32(0),
    ]
}

fn meta(
    sampler: Sampler,
    array: Option<Node>,
    depth_compare: Option<Node>,
    aoffi: Vec<Node>,
    ptp: Vec<Node>,
    derivates: Vec<Node>,
    bias: Option<Node>,
    lod: Option<Node>,
    component: Option<Node>,
    element: u32,
    index: Option<Node>,
) -> Meta {
    Meta::Texture(MetaTexture {
        sampler,
        array,
        depth_compare,
        aoffi,
        ptp,
        derivates,
        bias,
        lod,
        component,
        element,
        index,
    })
}

impl<'r> ShaderIr<'r> {
    pub(crate) fn decode_texture(&mut self, bb: &mut NodeBlock, pc: u32) -> u32 {
        let instr = Instruction(self.program_code[pc as usize]);
        let matcher = crate::opcode::decode(instr).unwrap();

        match matcher.id() {
            OpId::TEX => {
                let tex = instr.tex();
                let texture_type = tex.texture_type().unwrap_or(TextureType::Texture2D);
                let is_array = tex.array();
                let is_aoffi = tex.uses_misc_mode(TextureMiscMode::Aoffi);
                let depth_compare = tex.uses_misc_mode(TextureMiscMode::Dc);
                let process_mode = tex.process_mode().unwrap_or(TextureProcessMode::None);
                let values = self.get_tex_code(
                    instr,
                    texture_type,
                    process_mode,
                    depth_compare,
                    is_array,
                    is_aoffi,
                    None,
                );
                self.write_tex_instruction_float(bb, instr, values);
            }
            OpId::TEX_B => {
                let tex = instr.tex_b();
                let texture_type = tex.texture_type().unwrap_or(TextureType::Texture2D);
                let is_array = tex.array();
                let is_aoffi = tex.uses_misc_mode(TextureMiscMode::Aoffi);
                let depth_compare = tex.uses_misc_mode(TextureMiscMode::Dc);
                let process_mode = tex.process_mode().unwrap_or(TextureProcessMode::None);
                let values = self.get_tex_code(
                    instr,
                    texture_type,
                    process_mode,
                    depth_compare,
                    is_array,
                    is_aoffi,
                    Some(instr.gpr20()),
                );
                self.write_tex_instruction_float(bb, instr, values);
            }
            OpId::TEXS => {
                let texs = instr.texs();
                let texture_type = texs.texture_type();
                let is_array = texs.is_array_texture();
                let depth_compare = texs.uses_misc_mode(TextureMiscMode::Dc);
                let process_mode = texs.process_mode();
                let components =
                    self.get_texs_code(instr, texture_type, process_mode, depth_compare, is_array);
                if texs.fp32_flag() {
                    self.write_texs_instruction_float(bb, instr, components, false);
                } else {
                    self.write_texs_instruction_half_float(bb, instr, components, false);
                }
            }
            OpId::TLD4 | OpId::TLD4_B => {
                let is_bindless = matcher.id() == OpId::TLD4_B;
                let tld4 = instr.tld4();
                if tld4.uses_misc_mode(TextureMiscMode::Ndv) {
                    warn!("TLD4 NDV is not implemented");
                }
                let texture_type = tld4.texture_type().unwrap_or(TextureType::Texture2D);
                let depth_compare = tld4.uses_misc_mode(TextureMiscMode::Dc);
                let is_aoffi = tld4.uses_misc_mode(TextureMiscMode::Aoffi);
                let is_ptp = tld4.uses_misc_mode(TextureMiscMode::Ptp);
                let is_array = tld4.array();
                let values = self.get_tld4_code(
                    instr,
                    texture_type,
                    depth_compare,
                    is_array,
                    is_aoffi,
                    is_ptp,
                    is_bindless,
                );
                self.write_tex_instruction_float(bb, instr, values);
            }
            OpId::TLD4S => {
                self.decode_tld4s(bb, instr);
            }
            OpId::TXD | OpId::TXD_B => {
                self.decode_txd(bb, instr, matcher.id() == OpId::TXD_B);
            }
            OpId::TXQ | OpId::TXQ_B => {
                self.decode_txq(bb, instr, matcher.id() == OpId::TXQ_B);
            }
            OpId::TMML | OpId::TMML_B => {
                self.decode_tmml(bb, instr, matcher.id() == OpId::TMML_B);
            }
            OpId::TLD => {
                let tld = instr.tld();
                if tld.aoffi() || tld.ms() || tld.cl() {
                    warn!("TLD AOFFI/MS/CL modes are not implemented");
                }
                let values = self.get_tld_code(instr);
                self.write_tex_instruction_float(bb, instr, values);
            }
            OpId::TLDS => {
                let tlds = instr.tlds();
                let texture_type = tlds.texture_type();
                let is_array = tlds.is_array_texture();
                if tlds.uses_misc_mode(TextureMiscMode::Aoffi)
                    || tlds.uses_misc_mode(TextureMiscMode::Mz)
                {
                    warn!("TLDS AOFFI/MZ modes are not implemented");
                }
                let components = self.get_tlds_code(instr, texture_type, is_array);
                if tlds.fp32_flag() {
                    self.write_texs_instruction_float(bb, instr, components, false);
                } else {
                    self.write_texs_instruction_half_float(bb, instr, components, false);
                }
            }
            _ => {
                warn!("Unhandled texture instruction: {}", matcher.name());
            }
        }
        pc
    }

    fn bound_sampler(&mut self, instr: Instruction, info: SamplerInfo) -> Sampler {
        let offset = instr.sampler().index() as u32;
        self.get_sampler(offset, info)
    }

    fn write_tex_instruction_float(
        &mut self,
        bb: &mut NodeBlock,
        instr: Instruction,
        components: [Node; 4],
    ) {
        let mut dest_elem = 0u32;
        for (elem, component) in components.iter().enumerate() {
            if !instr.tex().is_component_enabled(elem) {
                continue;
            }
            self.set_temporary(bb, dest_elem, component.clone());
            dest_elem += 1;
        }
        // Temporaries first: a destination register may also feed a
        // coordinate of a later element.
        for i in 0..dest_elem {
            let tmp = self.get_temporary(i);
            self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
        }
    }

    fn write_texs_instruction_float(
        &mut self,
        bb: &mut NodeBlock,
        instr: Instruction,
        components: [Node; 4],
        ignore_mask: bool,
    ) {
        // TEXS writes the first two swizzle components to gpr0 and the
        // rest to gpr28.
        let mut dest_elem = 0u32;
        for (component, value) in components.iter().enumerate() {
            if !instr.texs().is_component_enabled(component) && !ignore_mask {
                continue;
            }
            self.set_temporary(bb, dest_elem, value.clone());
            dest_elem += 1;
        }
        for i in 0..dest_elem {
            let tmp = self.get_temporary(i);
            if i < 2 {
                self.set_register(bb, Register(instr.gpr0().0 + i % 2), tmp);
            } else {
                self.set_register(bb, Register(instr.texs().gpr28().0 + i % 2), tmp);
            }
        }
    }

    fn write_texs_instruction_half_float(
        &mut self,
        bb: &mut NodeBlock,
        instr: Instruction,
        components: [Node; 4],
        ignore_mask: bool,
    ) {
        // F16 destinations are packed in pairs.
        let mut values = zero4();
        let mut dest_elem = 0usize;
        for (component, value) in components.iter().enumerate() {
            if !instr.texs().is_component_enabled(component) && !ignore_mask {
                continue;
            }
            values[dest_elem] = value.clone();
            dest_elem += 1;
        }
        if dest_elem == 0 {
            return;
        }
        let first_value = operation(
            OperationCode::HPack2,
            vec![values[0].clone(), values[1].clone()],
        );
        if dest_elem <= 2 {
            self.set_register(bb, instr.gpr0(), first_value);
            return;
        }
        self.set_temporary(bb, 0, first_value);
        let second = operation(
            OperationCode::HPack2,
            vec![values[2].clone(), values[3].clone()],
        );
        self.set_temporary(bb, 1, second);
        let t0 = self.get_temporary(0);
        let t1 = self.get_temporary(1);
        self.set_register(bb, instr.gpr0(), t0);
        self.set_register(bb, instr.texs().gpr28(), t1);
    }

    #[allow(clippy::too_many_arguments)]
    fn get_texture_code(
        &mut self,
        instr: Instruction,
        texture_type: TextureType,
        process_mode: TextureProcessMode,
        coords: Vec<Node>,
        array: Option<Node>,
        depth_compare: Option<Node>,
        bias_offset: u32,
        aoffi: Vec<Node>,
        bindless_reg: Option<Register>,
    ) -> [Node; 4] {
        let info = SamplerInfo {
            texture_type: Some(texture_type),
            is_array: Some(array.is_some()),
            is_shadow: Some(depth_compare.is_some()),
            is_buffer: Some(false),
        };
        let (sampler, index_var) = match bindless_reg {
            Some(reg) => match self.get_bindless_sampler(reg, info) {
                Some(found) => found,
                None => {
                    warn!("Bindless sampler tracking failed");
                    return zero4();
                }
            },
            None => (self.bound_sampler(instr, info), None),
        };

        let lod_needed = matches!(
            process_mode,
            TextureProcessMode::Lz | TextureProcessMode::Ll | TextureProcessMode::Lla
        );
        let opcode = if lod_needed {
            OperationCode::TextureLod
        } else {
            OperationCode::Texture
        };

        let mut bias = None;
        let mut lod = None;
        match process_mode {
            TextureProcessMode::None => {}
            TextureProcessMode::Lz => lod = Some(immediate_f32(0.0)),
            TextureProcessMode::Lb | TextureProcessMode::Lba => {
                // Bias is in the gpr20 slot, shifted by the other operands.
                bias = Some(self.get_register(Register(instr.gpr20().0 + bias_offset)));
            }
            TextureProcessMode::Ll | TextureProcessMode::Lla => {
                lod = Some(self.get_register(Register(instr.gpr20().0 + bias_offset)));
            }
        }

        let mut values = zero4();
        for (element, value) in values.iter_mut().enumerate() {
            let m = meta(
                sampler.clone(),
                array.clone(),
                depth_compare.clone(),
                aoffi.clone(),
                Vec::new(),
                Vec::new(),
                bias.clone(),
                lod.clone(),
                None,
                element as u32,
                index_var.clone(),
            );
            *value = operation_meta(opcode, m, coords.clone());
        }
        values
    }

    #[allow(clippy::too_many_arguments)]
    fn get_tex_code(
        &mut self,
        instr: Instruction,
        texture_type: TextureType,
        process_mode: TextureProcessMode,
        depth_compare: bool,
        is_array: bool,
        is_aoffi: bool,
        bindless_reg: Option<Register>,
    ) -> [Node; 4] {
        let lod_bias_enabled = !matches!(
            process_mode,
            TextureProcessMode::None | TextureProcessMode::Lz
        );
        let bias_lod_offset = u32::from(bindless_reg.is_some());
        let mut parameter_register = instr.gpr20().0 + u32::from(bindless_reg.is_some());
        if lod_bias_enabled {
            parameter_register += 1;
        }

        let count = coord_count(texture_type);
        // With arrays the index is always in gpr8, coordinates follow.
        let array_register = instr.gpr8().0;
        let coord_register = array_register + u32::from(is_array);

        let mut coords = Vec::with_capacity(count + 1);
        for i in 0..count {
            let reg = self.get_register(Register(coord_register + i as u32));
            coords.push(reg);
        }
        // 1D depth compare reads a dummy second component.
        if depth_compare && !is_array && texture_type == TextureType::Texture1D {
            coords.push(immediate_f32(0.0));
        }

        let array = if is_array {
            Some(self.get_register(Register(array_register)))
        } else {
            None
        };

        let mut aoffi = Vec::new();
        if is_aoffi {
            let reg = self.get_register(Register(parameter_register));
            parameter_register += 1;
            aoffi = self.get_aoffi_coordinates(reg, count, false);
        }

        let dc = if depth_compare {
            let reg = self.get_register(Register(parameter_register));
            Some(reg)
        } else {
            None
        };

        self.get_texture_code(
            instr,
            texture_type,
            process_mode,
            coords,
            array,
            dc,
            bias_lod_offset,
            aoffi,
            bindless_reg,
        )
    }

    fn get_texs_code(
        &mut self,
        instr: Instruction,
        texture_type: TextureType,
        process_mode: TextureProcessMode,
        depth_compare: bool,
        is_array: bool,
    ) -> [Node; 4] {
        let lod_bias_enabled = !matches!(
            process_mode,
            TextureProcessMode::None | TextureProcessMode::Lz
        );
        let count = coord_count(texture_type);
        let array_register = instr.gpr8().0;
        let coord_register = array_register + u32::from(is_array);
        let last_coord_register =
            if is_array || !(lod_bias_enabled || depth_compare) || count > 2 {
                instr.gpr20().0
            } else {
                coord_register + 1
            };
        let bias_offset = u32::from(count > 2);

        let mut coords = Vec::with_capacity(count);
        for i in 0..count {
            let last = i == count - 1 && count > 1;
            let reg = if last {
                last_coord_register
            } else {
                coord_register + i as u32
            };
            let node = self.get_register(Register(reg));
            coords.push(node);
        }
        let array = if is_array {
            Some(self.get_register(Register(array_register)))
        } else {
            None
        };
        let dc = if depth_compare {
            let depth_register = instr.gpr20().0 + u32::from(lod_bias_enabled);
            Some(self.get_register(Register(depth_register)))
        } else {
            None
        };

        self.get_texture_code(
            instr,
            texture_type,
            process_mode,
            coords,
            array,
            dc,
            bias_offset,
            Vec::new(),
            None,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn get_tld4_code(
        &mut self,
        instr: Instruction,
        texture_type: TextureType,
        depth_compare: bool,
        is_array: bool,
        is_aoffi: bool,
        is_ptp: bool,
        is_bindless: bool,
    ) -> [Node; 4] {
        let count = coord_count(texture_type);
        let array_register = instr.gpr8().0;
        let coord_register = array_register + u32::from(is_array);

        let mut coords = Vec::with_capacity(count);
        for i in 0..count {
            let node = self.get_register(Register(coord_register + i as u32));
            coords.push(node);
        }

        let mut parameter_register = instr.gpr20().0;
        let info = SamplerInfo {
            texture_type: Some(texture_type),
            is_array: Some(is_array),
            is_shadow: Some(depth_compare),
            is_buffer: Some(false),
        };
        let (sampler, index_var) = if is_bindless {
            let reg = Register(parameter_register);
            parameter_register += 1;
            match self.get_bindless_sampler(reg, info) {
                Some(found) => found,
                None => return zero4(),
            }
        } else {
            (self.bound_sampler(instr, info), None)
        };

        let mut aoffi = Vec::new();
        let mut ptp = Vec::new();
        if is_aoffi {
            let reg = self.get_register(Register(parameter_register));
            parameter_register += 1;
            aoffi = self.get_aoffi_coordinates(reg, count, true);
        } else if is_ptp {
            let reg_a = self.get_register(Register(parameter_register));
            parameter_register += 1;
            let reg_b = self.get_register(Register(parameter_register));
            parameter_register += 1;
            ptp = self.get_ptp_coordinates([reg_a, reg_b]);
        }

        let dc = if depth_compare {
            Some(self.get_register(Register(parameter_register)))
        } else {
            None
        };

        let component = immediate_u32(instr.tld4().component() as u32);

        let array = self.get_register(Register(array_register));
        let mut values = zero4();
        for (element, value) in values.iter_mut().enumerate() {
            let m = meta(
                sampler.clone(),
                Some(array.clone()),
                dc.clone(),
                aoffi.clone(),
                ptp.clone(),
                Vec::new(),
                None,
                None,
                Some(component.clone()),
                element as u32,
                index_var.clone(),
            );
            *value = operation_meta(OperationCode::TextureGather, m, coords.clone());
        }
        values
    }

    fn decode_tld4s(&mut self, bb: &mut NodeBlock, instr: Instruction) {
        const NUM_COORDS: usize = 2;
        let tld4s = instr.tld4s();
        let is_aoffi = tld4s.uses_misc_mode(TextureMiscMode::Aoffi);
        let is_depth_compare = tld4s.uses_misc_mode(TextureMiscMode::Dc);
        let op_a = self.get_register(instr.gpr8());
        let op_b = self.get_register(instr.gpr20());

        let mut coords = Vec::new();
        let mut aoffi = Vec::new();
        let mut depth_compare = None;
        if is_depth_compare {
            // The coordinate encoding matches TEXS.
            let op_y = self.get_register(Register(instr.gpr8().0 + 1));
            coords.push(op_a);
            coords.push(op_y);
            if is_aoffi {
                aoffi = self.get_aoffi_coordinates(op_b, NUM_COORDS, true);
                depth_compare = Some(self.get_register(Register(instr.gpr20().0 + 1)));
            } else {
                depth_compare = Some(op_b);
            }
        } else {
            coords.push(op_a);
            if is_aoffi {
                let op_y = self.get_register(Register(instr.gpr8().0 + 1));
                coords.push(op_y);
                aoffi = self.get_aoffi_coordinates(op_b, NUM_COORDS, true);
            } else {
                coords.push(op_b);
            }
        }
        let component = immediate_u32(tld4s.component() as u32);

        let info = SamplerInfo {
            texture_type: Some(TextureType::Texture2D),
            is_array: Some(false),
            is_shadow: Some(is_depth_compare),
            is_buffer: Some(false),
        };
        let sampler = self.bound_sampler(instr, info);

        let mut values = zero4();
        for (element, value) in values.iter_mut().enumerate() {
            let m = meta(
                sampler.clone(),
                None,
                depth_compare.clone(),
                aoffi.clone(),
                Vec::new(),
                Vec::new(),
                None,
                None,
                Some(component.clone()),
                element as u32,
                None,
            );
            *value = operation_meta(OperationCode::TextureGather, m, coords.clone());
        }
        if tld4s.fp16_flag() {
            self.write_texs_instruction_half_float(bb, instr, values, true);
        } else {
            self.write_texs_instruction_float(bb, instr, values, true);
        }
    }

    fn decode_txd(&mut self, bb: &mut NodeBlock, instr: Instruction, is_bindless: bool) {
        let txd = instr.txd();
        if txd.aoffi_flag() {
            warn!("TXD AOFFI is not implemented");
        }
        let is_array = txd.is_array();
        let mut base_reg = instr.gpr8().0;
        let derivate_reg = instr.gpr20().0;
        let texture_type = txd.texture_type().unwrap_or(TextureType::Texture2D);
        let count = coord_count(texture_type);

        let info = SamplerInfo {
            texture_type: Some(texture_type),
            is_array: Some(is_array),
            is_shadow: Some(false),
            is_buffer: Some(false),
        };
        let (sampler, index_var) = if is_bindless {
            match self.get_bindless_sampler(Register(base_reg), info) {
                Some(found) => found,
                None => {
                    self.write_tex_instruction_float(bb, instr, zero4());
                    return;
                }
            }
        } else {
            (self.bound_sampler(instr, info), None)
        };
        if is_bindless {
            base_reg += 1;
        }

        let mut coords = Vec::with_capacity(count);
        let mut derivates = Vec::with_capacity(count * 2);
        for i in 0..count {
            let coord = self.get_register(Register(base_reg + i as u32));
            coords.push(coord);
            let derivate = (i * 2) as u32;
            let dx = self.get_register(Register(derivate_reg + derivate));
            let dy = self.get_register(Register(derivate_reg + derivate + 1));
            derivates.push(dx);
            derivates.push(dy);
        }

        let array = if is_array {
            let info_reg = self.get_register(Register(base_reg + count as u32));
            Some(bitfield_extract(info_reg, 0, 16))
        } else {
            None
        };

        let mut values = zero4();
        for (element, value) in values.iter_mut().enumerate() {
            let m = meta(
                sampler.clone(),
                array.clone(),
                None,
                Vec::new(),
                Vec::new(),
                derivates.clone(),
                None,
                None,
                None,
                element as u32,
                index_var.clone(),
            );
            *value = operation_meta(OperationCode::TextureGradient, m, coords.clone());
        }
        self.write_tex_instruction_float(bb, instr, values);
    }

    fn decode_txq(&mut self, bb: &mut NodeBlock, instr: Instruction, is_bindless: bool) {
        let txq = instr.txq();
        let info = SamplerInfo::default();
        let (sampler, index_var) = if is_bindless {
            match self.get_bindless_sampler(instr.gpr8(), info) {
                Some(found) => found,
                None => {
                    let mut indexer = 0u32;
                    for element in 0..4 {
                        if !txq.is_component_enabled(element) {
                            continue;
                        }
                        self.set_temporary(bb, indexer, immediate_u32(0));
                        indexer += 1;
                    }
                    for i in 0..indexer {
                        let tmp = self.get_temporary(i);
                        self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
                    }
                    return;
                }
            }
        } else {
            (self.bound_sampler(instr, info), None)
        };

        match txq.query_type() {
            Some(TextureQueryType::Dimension) => {
                let mut indexer = 0u32;
                for element in 0..4u32 {
                    if !txq.is_component_enabled(element as usize) {
                        continue;
                    }
                    let lod =
                        self.get_register(Register(instr.gpr8().0 + u32::from(is_bindless)));
                    let m = meta(
                        sampler.clone(),
                        None,
                        None,
                        Vec::new(),
                        Vec::new(),
                        Vec::new(),
                        None,
                        None,
                        None,
                        element,
                        index_var.clone(),
                    );
                    let value =
                        operation_meta(OperationCode::TextureQueryDimensions, m, vec![lod]);
                    self.set_temporary(bb, indexer, value);
                    indexer += 1;
                }
                for i in 0..indexer {
                    let tmp = self.get_temporary(i);
                    self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
                }
            }
            other => {
                warn!("Unhandled texture query type: {:?}", other);
            }
        }
    }

    fn decode_tmml(&mut self, bb: &mut NodeBlock, instr: Instruction, is_bindless: bool) {
        let tmml = instr.tmml();
        if tmml.ndv_flag() {
            warn!("TMML NDV is not implemented");
        }
        let mut texture_type = tmml.texture_type().unwrap_or(TextureType::Texture2D);
        let info = SamplerInfo::default();
        let (sampler, index_var) = if is_bindless {
            match self.get_bindless_sampler(instr.gpr20(), info) {
                Some(found) => found,
                None => {
                    let mut indexer = 0u32;
                    for element in 0..2 {
                        if !tmml.is_component_enabled(element) {
                            continue;
                        }
                        self.set_temporary(bb, indexer, immediate_u32(0));
                        indexer += 1;
                    }
                    for i in 0..indexer {
                        let tmp = self.get_temporary(i);
                        self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
                    }
                    return;
                }
            }
        } else {
            (self.bound_sampler(instr, info), None)
        };

        let mut coords = Vec::new();
        match texture_type {
            TextureType::Texture1D => {
                let x = self.get_register(instr.gpr8());
                coords.push(x);
            }
            TextureType::Texture2D => {
                let x = self.get_register(instr.gpr8());
                let y = self.get_register(Register(instr.gpr8().0 + 1));
                coords.push(x);
                coords.push(y);
            }
            other => {
                warn!("Unhandled TMML texture type {:?}", other);
                let x = self.get_register(instr.gpr8());
                let y = self.get_register(Register(instr.gpr8().0 + 1));
                coords.push(x);
                coords.push(y);
                texture_type = TextureType::Texture2D;
            }
        }
        let _ = texture_type;
        let mut indexer = 0u32;
        for element in 0..2u32 {
            if !tmml.is_component_enabled(element as usize) {
                continue;
            }
            let m = meta(
                sampler.clone(),
                None,
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
                None,
                None,
                element,
                index_var.clone(),
            );
            let value = operation_meta(OperationCode::TextureQueryLod, m, coords.clone());
            self.set_temporary(bb, indexer, value);
            indexer += 1;
        }
        for i in 0..indexer {
            let tmp = self.get_temporary(i);
            self.set_register(bb, Register(instr.gpr0().0 + i), tmp);
        }
    }

    fn get_tld_code(&mut self, instr: Instruction) -> [Node; 4] {
        let tld = instr.tld();
        let texture_type = tld.texture_type().unwrap_or(TextureType::Texture2D);
        let is_array = tld.is_array();
        let lod_enabled = tld.process_mode() == TextureProcessMode::Ll;
        let count = coord_count(texture_type);

        let mut gpr8_cursor = instr.gpr8().0;
        let array_register = if is_array {
            let reg = self.get_register(Register(gpr8_cursor));
            gpr8_cursor += 1;
            Some(reg)
        } else {
            None
        };

        let mut coords = Vec::with_capacity(count);
        for _ in 0..count {
            let reg = self.get_register(Register(gpr8_cursor));
            gpr8_cursor += 1;
            coords.push(reg);
        }

        let lod = if lod_enabled {
            self.get_register(instr.gpr20())
        } else {
            immediate_u32(0)
        };

        let sampler = self.bound_sampler(instr, SamplerInfo::default());

        let mut values = zero4();
        for (element, value) in values.iter_mut().enumerate() {
            let m = meta(
                sampler.clone(),
                array_register.clone(),
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
                Some(lod.clone()),
                None,
                element as u32,
                None,
            );
            *value = operation_meta(OperationCode::TexelFetch, m, coords.clone());
        }
        values
    }

    fn get_tlds_code(
        &mut self,
        instr: Instruction,
        texture_type: TextureType,
        is_array: bool,
    ) -> [Node; 4] {
        let sampler = self.bound_sampler(instr, SamplerInfo::default());
        let type_coord_count = coord_count(texture_type);
        let lod_enabled = instr.tlds().process_mode() == TextureProcessMode::Ll;

        let array_register = instr.gpr8().0;
        let coord_register = if is_array {
            instr.gpr20().0
        } else {
            instr.gpr8().0
        };
        let last_coord_register = if ((type_coord_count > 2)
            || (type_coord_count == 2 && !lod_enabled))
            && !is_array
        {
            instr.gpr20().0
        } else {
            coord_register + 1
        };

        let mut coords = Vec::with_capacity(type_coord_count);
        for i in 0..type_coord_count {
            let last = i == type_coord_count - 1 && type_coord_count > 1;
            let reg = if last {
                last_coord_register
            } else {
                coord_register + i as u32
            };
            let node = self.get_register(Register(reg));
            coords.push(node);
        }
        let array = if is_array {
            Some(self.get_register(Register(array_register)))
        } else {
            None
        };
        let lod = if lod_enabled {
            self.get_register(instr.gpr20())
        } else {
            immediate_u32(0)
        };

        // Fill missing coordinates when the bound texture disagrees.
        let entry_coord_count = coord_count(sampler.texture_type);
        if type_coord_count != entry_coord_count {
            warn!("Bound and built texture types mismatch");
            while coords.len() < entry_coord_count {
                let zero = self.get_register(Register(Register::ZERO_INDEX));
                coords.push(zero);
            }
            coords.truncate(entry_coord_count);
        }

        let mut values = zero4();
        for (element, value) in values.iter_mut().enumerate() {
            let m = meta(
                sampler.clone(),
                array.clone(),
                None,
                Vec::new(),
                Vec::new(),
                Vec::new(),
                None,
                Some(lod.clone()),
                None,
                element as u32,
                None,
            );
            *value = operation_meta(OperationCode::TexelFetch, m, coords.clone());
        }
        values
    }

    fn get_aoffi_coordinates(
        &mut self,
        aoffi_reg: Node,
        count: usize,
        is_tld4: bool,
    ) -> Vec<Node> {
        let coord_offsets: [u32; 3] = if is_tld4 { [0, 8, 16] } else { [0, 4, 8] };
        let size = if is_tld4 { 6 } else { 4 };
        let wrap_value: i32 = if is_tld4 { 32 } else { 8 };
        let diff_value: i32 = if is_tld4 { 64 } else { 16 };
        let mask = (1u32 << size) - 1;

        let mut aoffi = Vec::with_capacity(count);
        let immediate = self.track_immediate(
            &aoffi_reg,
            &self.global_code,
            self.global_code.len() as i64,
        );
        match immediate {
            Some(packed) => {
                for offset in coord_offsets.iter().take(count) {
                    let mut value = ((packed >> offset) & mask) as i32;
                    if value >= wrap_value {
                        value -= diff_value;
                    }
                    aoffi.push(immediate_s32(value));
                }
            }
            None => {
                // Variable offsets; some hardware will not accept these.
                warn!("AOFFI constant folding failed");
                for offset in coord_offsets.iter().take(count) {
                    let value = bitfield_extract(aoffi_reg.clone(), *offset, size);
                    let condition = operation(
                        OperationCode::LogicalIGreaterEqual,
                        vec![value.clone(), immediate_s32(wrap_value)],
                    );
                    let negative = operation(
                        OperationCode::IAdd,
                        vec![value.clone(), immediate_s32(-diff_value)],
                    );
                    aoffi.push(operation(
                        OperationCode::Select,
                        vec![condition, negative, value],
                    ));
                }
            }
        }
        aoffi
    }

    fn get_ptp_coordinates(&mut self, ptp_regs: [Node; 2]) -> Vec<Node> {
        const NUM_ENTRIES: u32 = 8;
        let mut ptp = Vec::with_capacity(NUM_ENTRIES as usize);
        let cursor = self.global_code.len() as i64;
        let low = self.track_immediate(&ptp_regs[0], &self.global_code, cursor);
        let high = self.track_immediate(&ptp_regs[1], &self.global_code, cursor);
        match (low, high) {
            (Some(low), Some(high)) => {
                let immediate = (u64::from(high) << 32) | u64::from(low);
                for entry in 0..NUM_ENTRIES {
                    let mut value = ((immediate >> (entry * 8)) & 0b11_1111) as i32;
                    if value >= 32 {
                        value -= 64;
                    }
                    ptp.push(immediate_s32(value));
                }
            }
            _ => {
                for entry in 0..NUM_ENTRIES {
                    let reg = &ptp_regs[(entry / 4) as usize];
                    let offset = entry % 4;
                    let value = bitfield_extract(reg.clone(), offset * 8, 6);
                    let condition = operation(
                        OperationCode::LogicalIGreaterEqual,
                        vec![value.clone(), immediate_u32(32)],
                    );
                    let negative = operation(
                        OperationCode::IAdd,
                        vec![value.clone(), immediate_s32(-64)],
                    );
                    ptp.push(operation(
                        OperationCode::Select,
                        vec![condition, negative, value],
                    ));
                }
            }
        }
        ptp
    }
}
