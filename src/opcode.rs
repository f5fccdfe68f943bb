//! Opcode table: binary encodings, text names and classification.

use wasmparser::{MemArg, Operator};

/// The shape of the expression an opcode belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpcodeKind {
    Control,
    Const,
    Unary,
    Binary,
    Compare,
    Convert,
    Ternary,
    Load,
    Store,
    SimdLane,
    SimdShuffle,
    Bulk,
}

macro_rules! opt_prefix {
    () => {
        None
    };
    ($prefix:literal) => {
        Some($prefix)
    };
}

/// Each row is `Variant = Kind, [prefix] code, "text name";`. The
/// `plain`, `memory` and `lane` sections also name the matching
/// `wasmparser::Operator` variant (same identifier), which carries no
/// immediate, a `memarg`, or a `lane` respectively.
macro_rules! opcodes {
    (
        other { $( $ov:ident = $okind:ident, $( [ $opre:literal ] )? $ocode:literal, $oname:literal; )* }
        plain { $( $pv:ident = $pkind:ident, $( [ $ppre:literal ] )? $pcode:literal, $pname:literal; )* }
        memory { $( $mv:ident = $mkind:ident, $( [ $mpre:literal ] )? $mcode:literal, $mname:literal; )* }
        lane { $( $lv:ident = $lkind:ident, $( [ $lpre:literal ] )? $lcode:literal, $lname:literal; )* }
    ) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum Opcode {
            $( $ov, )*
            $( $pv, )*
            $( $mv, )*
            $( $lv, )*
        }

        impl Opcode {
            /// Prefix byte (`0xfc`, `0xfd`) and the opcode's code. The
            /// code is a single byte when unprefixed and a LEB128 u32
            /// after a prefix.
            pub fn encoding(self) -> (Option<u8>, u32) {
                match self {
                    $( Opcode::$ov => (opt_prefix!($($opre)?), $ocode), )*
                    $( Opcode::$pv => (opt_prefix!($($ppre)?), $pcode), )*
                    $( Opcode::$mv => (opt_prefix!($($mpre)?), $mcode), )*
                    $( Opcode::$lv => (opt_prefix!($($lpre)?), $lcode), )*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Opcode::$ov => $oname, )*
                    $( Opcode::$pv => $pname, )*
                    $( Opcode::$mv => $mname, )*
                    $( Opcode::$lv => $lname, )*
                }
            }

            pub fn kind(self) -> OpcodeKind {
                match self {
                    $( Opcode::$ov => OpcodeKind::$okind, )*
                    $( Opcode::$pv => OpcodeKind::$pkind, )*
                    $( Opcode::$mv => OpcodeKind::$mkind, )*
                    $( Opcode::$lv => OpcodeKind::$lkind, )*
                }
            }

            /// Operators without immediates that map onto a generic
            /// unary/binary/compare/convert/ternary expression.
            pub fn from_plain_operator(op: &Operator) -> Option<Opcode> {
                match op {
                    $( Operator::$pv => Some(Opcode::$pv), )*
                    _ => None,
                }
            }

            pub fn from_memory_operator(op: &Operator) -> Option<(Opcode, MemArg)> {
                match op {
                    $( Operator::$mv { memarg } => Some((Opcode::$mv, *memarg)), )*
                    _ => None,
                }
            }

            pub fn from_lane_operator(op: &Operator) -> Option<(Opcode, u8)> {
                match op {
                    $( Operator::$lv { lane } => Some((Opcode::$lv, *lane)), )*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    other {
        Unreachable = Control, 0x00, "unreachable";
        Nop = Control, 0x01, "nop";
        Block = Control, 0x02, "block";
        Loop = Control, 0x03, "loop";
        If = Control, 0x04, "if";
        Else = Control, 0x05, "else";
        Try = Control, 0x06, "try";
        Catch = Control, 0x07, "catch";
        Throw = Control, 0x08, "throw";
        Rethrow = Control, 0x09, "rethrow";
        IfExcept = Control, 0x0a, "if_except";
        End = Control, 0x0b, "end";
        Br = Control, 0x0c, "br";
        BrIf = Control, 0x0d, "br_if";
        BrTable = Control, 0x0e, "br_table";
        Return = Control, 0x0f, "return";
        Call = Control, 0x10, "call";
        CallIndirect = Control, 0x11, "call_indirect";
        ReturnCall = Control, 0x12, "return_call";
        ReturnCallIndirect = Control, 0x13, "return_call_indirect";
        CatchAll = Control, 0x19, "catch_all";
        Drop = Control, 0x1a, "drop";
        Select = Control, 0x1b, "select";
        LocalGet = Control, 0x20, "local.get";
        LocalSet = Control, 0x21, "local.set";
        LocalTee = Control, 0x22, "local.tee";
        GlobalGet = Control, 0x23, "global.get";
        GlobalSet = Control, 0x24, "global.set";
        MemorySize = Bulk, 0x3f, "memory.size";
        MemoryGrow = Bulk, 0x40, "memory.grow";
        I32Const = Const, 0x41, "i32.const";
        I64Const = Const, 0x42, "i64.const";
        F32Const = Const, 0x43, "f32.const";
        F64Const = Const, 0x44, "f64.const";
        MemoryInit = Bulk, [0xfc] 8, "memory.init";
        DataDrop = Bulk, [0xfc] 9, "data.drop";
        MemoryCopy = Bulk, [0xfc] 10, "memory.copy";
        MemoryFill = Bulk, [0xfc] 11, "memory.fill";
        TableInit = Bulk, [0xfc] 12, "table.init";
        ElemDrop = Bulk, [0xfc] 13, "elem.drop";
        TableCopy = Bulk, [0xfc] 14, "table.copy";
        V128Const = Const, [0xfd] 12, "v128.const";
        I8x16Shuffle = SimdShuffle, [0xfd] 13, "i8x16.shuffle";
    }
    plain {
        I32Eqz = Convert, 0x45, "i32.eqz";
        I32Eq = Compare, 0x46, "i32.eq";
        I32Ne = Compare, 0x47, "i32.ne";
        I32LtS = Compare, 0x48, "i32.lt_s";
        I32LtU = Compare, 0x49, "i32.lt_u";
        I32GtS = Compare, 0x4a, "i32.gt_s";
        I32GtU = Compare, 0x4b, "i32.gt_u";
        I32LeS = Compare, 0x4c, "i32.le_s";
        I32LeU = Compare, 0x4d, "i32.le_u";
        I32GeS = Compare, 0x4e, "i32.ge_s";
        I32GeU = Compare, 0x4f, "i32.ge_u";
        I64Eqz = Convert, 0x50, "i64.eqz";
        I64Eq = Compare, 0x51, "i64.eq";
        I64Ne = Compare, 0x52, "i64.ne";
        I64LtS = Compare, 0x53, "i64.lt_s";
        I64LtU = Compare, 0x54, "i64.lt_u";
        I64GtS = Compare, 0x55, "i64.gt_s";
        I64GtU = Compare, 0x56, "i64.gt_u";
        I64LeS = Compare, 0x57, "i64.le_s";
        I64LeU = Compare, 0x58, "i64.le_u";
        I64GeS = Compare, 0x59, "i64.ge_s";
        I64GeU = Compare, 0x5a, "i64.ge_u";
        F32Eq = Compare, 0x5b, "f32.eq";
        F32Ne = Compare, 0x5c, "f32.ne";
        F32Lt = Compare, 0x5d, "f32.lt";
        F32Gt = Compare, 0x5e, "f32.gt";
        F32Le = Compare, 0x5f, "f32.le";
        F32Ge = Compare, 0x60, "f32.ge";
        F64Eq = Compare, 0x61, "f64.eq";
        F64Ne = Compare, 0x62, "f64.ne";
        F64Lt = Compare, 0x63, "f64.lt";
        F64Gt = Compare, 0x64, "f64.gt";
        F64Le = Compare, 0x65, "f64.le";
        F64Ge = Compare, 0x66, "f64.ge";
        I32Clz = Unary, 0x67, "i32.clz";
        I32Ctz = Unary, 0x68, "i32.ctz";
        I32Popcnt = Unary, 0x69, "i32.popcnt";
        I32Add = Binary, 0x6a, "i32.add";
        I32Sub = Binary, 0x6b, "i32.sub";
        I32Mul = Binary, 0x6c, "i32.mul";
        I32DivS = Binary, 0x6d, "i32.div_s";
        I32DivU = Binary, 0x6e, "i32.div_u";
        I32RemS = Binary, 0x6f, "i32.rem_s";
        I32RemU = Binary, 0x70, "i32.rem_u";
        I32And = Binary, 0x71, "i32.and";
        I32Or = Binary, 0x72, "i32.or";
        I32Xor = Binary, 0x73, "i32.xor";
        I32Shl = Binary, 0x74, "i32.shl";
        I32ShrS = Binary, 0x75, "i32.shr_s";
        I32ShrU = Binary, 0x76, "i32.shr_u";
        I32Rotl = Binary, 0x77, "i32.rotl";
        I32Rotr = Binary, 0x78, "i32.rotr";
        I64Clz = Unary, 0x79, "i64.clz";
        I64Ctz = Unary, 0x7a, "i64.ctz";
        I64Popcnt = Unary, 0x7b, "i64.popcnt";
        I64Add = Binary, 0x7c, "i64.add";
        I64Sub = Binary, 0x7d, "i64.sub";
        I64Mul = Binary, 0x7e, "i64.mul";
        I64DivS = Binary, 0x7f, "i64.div_s";
        I64DivU = Binary, 0x80, "i64.div_u";
        I64RemS = Binary, 0x81, "i64.rem_s";
        I64RemU = Binary, 0x82, "i64.rem_u";
        I64And = Binary, 0x83, "i64.and";
        I64Or = Binary, 0x84, "i64.or";
        I64Xor = Binary, 0x85, "i64.xor";
        I64Shl = Binary, 0x86, "i64.shl";
        I64ShrS = Binary, 0x87, "i64.shr_s";
        I64ShrU = Binary, 0x88, "i64.shr_u";
        I64Rotl = Binary, 0x89, "i64.rotl";
        I64Rotr = Binary, 0x8a, "i64.rotr";
        F32Abs = Unary, 0x8b, "f32.abs";
        F32Neg = Unary, 0x8c, "f32.neg";
        F32Ceil = Unary, 0x8d, "f32.ceil";
        F32Floor = Unary, 0x8e, "f32.floor";
        F32Trunc = Unary, 0x8f, "f32.trunc";
        F32Nearest = Unary, 0x90, "f32.nearest";
        F32Sqrt = Unary, 0x91, "f32.sqrt";
        F32Add = Binary, 0x92, "f32.add";
        F32Sub = Binary, 0x93, "f32.sub";
        F32Mul = Binary, 0x94, "f32.mul";
        F32Div = Binary, 0x95, "f32.div";
        F32Min = Binary, 0x96, "f32.min";
        F32Max = Binary, 0x97, "f32.max";
        F32Copysign = Binary, 0x98, "f32.copysign";
        F64Abs = Unary, 0x99, "f64.abs";
        F64Neg = Unary, 0x9a, "f64.neg";
        F64Ceil = Unary, 0x9b, "f64.ceil";
        F64Floor = Unary, 0x9c, "f64.floor";
        F64Trunc = Unary, 0x9d, "f64.trunc";
        F64Nearest = Unary, 0x9e, "f64.nearest";
        F64Sqrt = Unary, 0x9f, "f64.sqrt";
        F64Add = Binary, 0xa0, "f64.add";
        F64Sub = Binary, 0xa1, "f64.sub";
        F64Mul = Binary, 0xa2, "f64.mul";
        F64Div = Binary, 0xa3, "f64.div";
        F64Min = Binary, 0xa4, "f64.min";
        F64Max = Binary, 0xa5, "f64.max";
        F64Copysign = Binary, 0xa6, "f64.copysign";
        I32WrapI64 = Convert, 0xa7, "i32.wrap_i64";
        I32TruncF32S = Convert, 0xa8, "i32.trunc_f32_s";
        I32TruncF32U = Convert, 0xa9, "i32.trunc_f32_u";
        I32TruncF64S = Convert, 0xaa, "i32.trunc_f64_s";
        I32TruncF64U = Convert, 0xab, "i32.trunc_f64_u";
        I64ExtendI32S = Convert, 0xac, "i64.extend_i32_s";
        I64ExtendI32U = Convert, 0xad, "i64.extend_i32_u";
        I64TruncF32S = Convert, 0xae, "i64.trunc_f32_s";
        I64TruncF32U = Convert, 0xaf, "i64.trunc_f32_u";
        I64TruncF64S = Convert, 0xb0, "i64.trunc_f64_s";
        I64TruncF64U = Convert, 0xb1, "i64.trunc_f64_u";
        F32ConvertI32S = Convert, 0xb2, "f32.convert_i32_s";
        F32ConvertI32U = Convert, 0xb3, "f32.convert_i32_u";
        F32ConvertI64S = Convert, 0xb4, "f32.convert_i64_s";
        F32ConvertI64U = Convert, 0xb5, "f32.convert_i64_u";
        F32DemoteF64 = Convert, 0xb6, "f32.demote_f64";
        F64ConvertI32S = Convert, 0xb7, "f64.convert_i32_s";
        F64ConvertI32U = Convert, 0xb8, "f64.convert_i32_u";
        F64ConvertI64S = Convert, 0xb9, "f64.convert_i64_s";
        F64ConvertI64U = Convert, 0xba, "f64.convert_i64_u";
        F64PromoteF32 = Convert, 0xbb, "f64.promote_f32";
        I32ReinterpretF32 = Convert, 0xbc, "i32.reinterpret_f32";
        I64ReinterpretF64 = Convert, 0xbd, "i64.reinterpret_f64";
        F32ReinterpretI32 = Convert, 0xbe, "f32.reinterpret_i32";
        F64ReinterpretI64 = Convert, 0xbf, "f64.reinterpret_i64";
        I32Extend8S = Unary, 0xc0, "i32.extend8_s";
        I32Extend16S = Unary, 0xc1, "i32.extend16_s";
        I64Extend8S = Unary, 0xc2, "i64.extend8_s";
        I64Extend16S = Unary, 0xc3, "i64.extend16_s";
        I64Extend32S = Unary, 0xc4, "i64.extend32_s";
        I32TruncSatF32S = Convert, [0xfc] 0, "i32.trunc_sat_f32_s";
        I32TruncSatF32U = Convert, [0xfc] 1, "i32.trunc_sat_f32_u";
        I32TruncSatF64S = Convert, [0xfc] 2, "i32.trunc_sat_f64_s";
        I32TruncSatF64U = Convert, [0xfc] 3, "i32.trunc_sat_f64_u";
        I64TruncSatF32S = Convert, [0xfc] 4, "i64.trunc_sat_f32_s";
        I64TruncSatF32U = Convert, [0xfc] 5, "i64.trunc_sat_f32_u";
        I64TruncSatF64S = Convert, [0xfc] 6, "i64.trunc_sat_f64_s";
        I64TruncSatF64U = Convert, [0xfc] 7, "i64.trunc_sat_f64_u";
        I8x16Swizzle = Binary, [0xfd] 14, "i8x16.swizzle";
        I8x16Splat = Unary, [0xfd] 15, "i8x16.splat";
        I16x8Splat = Unary, [0xfd] 16, "i16x8.splat";
        I32x4Splat = Unary, [0xfd] 17, "i32x4.splat";
        I64x2Splat = Unary, [0xfd] 18, "i64x2.splat";
        F32x4Splat = Unary, [0xfd] 19, "f32x4.splat";
        F64x2Splat = Unary, [0xfd] 20, "f64x2.splat";
        I8x16Eq = Compare, [0xfd] 35, "i8x16.eq";
        I8x16Ne = Compare, [0xfd] 36, "i8x16.ne";
        I8x16LtS = Compare, [0xfd] 37, "i8x16.lt_s";
        I8x16LtU = Compare, [0xfd] 38, "i8x16.lt_u";
        I8x16GtS = Compare, [0xfd] 39, "i8x16.gt_s";
        I8x16GtU = Compare, [0xfd] 40, "i8x16.gt_u";
        I8x16LeS = Compare, [0xfd] 41, "i8x16.le_s";
        I8x16LeU = Compare, [0xfd] 42, "i8x16.le_u";
        I8x16GeS = Compare, [0xfd] 43, "i8x16.ge_s";
        I8x16GeU = Compare, [0xfd] 44, "i8x16.ge_u";
        I32x4Eq = Compare, [0xfd] 55, "i32x4.eq";
        I32x4Ne = Compare, [0xfd] 56, "i32x4.ne";
        F32x4Eq = Compare, [0xfd] 65, "f32x4.eq";
        F32x4Ne = Compare, [0xfd] 66, "f32x4.ne";
        F32x4Lt = Compare, [0xfd] 67, "f32x4.lt";
        F32x4Gt = Compare, [0xfd] 68, "f32x4.gt";
        F32x4Le = Compare, [0xfd] 69, "f32x4.le";
        F32x4Ge = Compare, [0xfd] 70, "f32x4.ge";
        V128Not = Unary, [0xfd] 77, "v128.not";
        V128And = Binary, [0xfd] 78, "v128.and";
        V128AndNot = Binary, [0xfd] 79, "v128.andnot";
        V128Or = Binary, [0xfd] 80, "v128.or";
        V128Xor = Binary, [0xfd] 81, "v128.xor";
        V128Bitselect = Ternary, [0xfd] 82, "v128.bitselect";
        V128AnyTrue = Unary, [0xfd] 83, "v128.any_true";
        I8x16Abs = Unary, [0xfd] 96, "i8x16.abs";
        I8x16Neg = Unary, [0xfd] 97, "i8x16.neg";
        I8x16AllTrue = Unary, [0xfd] 99, "i8x16.all_true";
        I8x16Add = Binary, [0xfd] 110, "i8x16.add";
        I8x16Sub = Binary, [0xfd] 113, "i8x16.sub";
        I32x4Abs = Unary, [0xfd] 160, "i32x4.abs";
        I32x4Neg = Unary, [0xfd] 161, "i32x4.neg";
        I32x4AllTrue = Unary, [0xfd] 163, "i32x4.all_true";
        I32x4Shl = Binary, [0xfd] 171, "i32x4.shl";
        I32x4ShrS = Binary, [0xfd] 172, "i32x4.shr_s";
        I32x4ShrU = Binary, [0xfd] 173, "i32x4.shr_u";
        I32x4Add = Binary, [0xfd] 174, "i32x4.add";
        I32x4Sub = Binary, [0xfd] 177, "i32x4.sub";
        I32x4Mul = Binary, [0xfd] 181, "i32x4.mul";
        F32x4Abs = Unary, [0xfd] 224, "f32x4.abs";
        F32x4Neg = Unary, [0xfd] 225, "f32x4.neg";
        F32x4Sqrt = Unary, [0xfd] 227, "f32x4.sqrt";
        F32x4Add = Binary, [0xfd] 228, "f32x4.add";
        F32x4Sub = Binary, [0xfd] 229, "f32x4.sub";
        F32x4Mul = Binary, [0xfd] 230, "f32x4.mul";
        F32x4Div = Binary, [0xfd] 231, "f32x4.div";
    }
    memory {
        I32Load = Load, 0x28, "i32.load";
        I64Load = Load, 0x29, "i64.load";
        F32Load = Load, 0x2a, "f32.load";
        F64Load = Load, 0x2b, "f64.load";
        I32Load8S = Load, 0x2c, "i32.load8_s";
        I32Load8U = Load, 0x2d, "i32.load8_u";
        I32Load16S = Load, 0x2e, "i32.load16_s";
        I32Load16U = Load, 0x2f, "i32.load16_u";
        I64Load8S = Load, 0x30, "i64.load8_s";
        I64Load8U = Load, 0x31, "i64.load8_u";
        I64Load16S = Load, 0x32, "i64.load16_s";
        I64Load16U = Load, 0x33, "i64.load16_u";
        I64Load32S = Load, 0x34, "i64.load32_s";
        I64Load32U = Load, 0x35, "i64.load32_u";
        I32Store = Store, 0x36, "i32.store";
        I64Store = Store, 0x37, "i64.store";
        F32Store = Store, 0x38, "f32.store";
        F64Store = Store, 0x39, "f64.store";
        I32Store8 = Store, 0x3a, "i32.store8";
        I32Store16 = Store, 0x3b, "i32.store16";
        I64Store8 = Store, 0x3c, "i64.store8";
        I64Store16 = Store, 0x3d, "i64.store16";
        I64Store32 = Store, 0x3e, "i64.store32";
        V128Load = Load, [0xfd] 0, "v128.load";
        V128Store = Store, [0xfd] 11, "v128.store";
    }
    lane {
        I8x16ExtractLaneS = SimdLane, [0xfd] 21, "i8x16.extract_lane_s";
        I8x16ExtractLaneU = SimdLane, [0xfd] 22, "i8x16.extract_lane_u";
        I8x16ReplaceLane = SimdLane, [0xfd] 23, "i8x16.replace_lane";
        I16x8ExtractLaneS = SimdLane, [0xfd] 24, "i16x8.extract_lane_s";
        I16x8ExtractLaneU = SimdLane, [0xfd] 25, "i16x8.extract_lane_u";
        I16x8ReplaceLane = SimdLane, [0xfd] 26, "i16x8.replace_lane";
        I32x4ExtractLane = SimdLane, [0xfd] 27, "i32x4.extract_lane";
        I32x4ReplaceLane = SimdLane, [0xfd] 28, "i32x4.replace_lane";
        I64x2ExtractLane = SimdLane, [0xfd] 29, "i64x2.extract_lane";
        I64x2ReplaceLane = SimdLane, [0xfd] 30, "i64x2.replace_lane";
        F32x4ExtractLane = SimdLane, [0xfd] 31, "f32x4.extract_lane";
        F32x4ReplaceLane = SimdLane, [0xfd] 32, "f32x4.replace_lane";
        F64x2ExtractLane = SimdLane, [0xfd] 33, "f64x2.extract_lane";
        F64x2ReplaceLane = SimdLane, [0xfd] 34, "f64x2.replace_lane";
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodings() {
        assert_eq!(Opcode::I32Add.encoding(), (None, 0x6a));
        assert_eq!(Opcode::MemoryCopy.encoding(), (Some(0xfc), 10));
        assert_eq!(Opcode::I32x4Abs.encoding(), (Some(0xfd), 160));
        assert_eq!(Opcode::I32Eqz.kind(), OpcodeKind::Convert);
        assert_eq!(Opcode::F64Le.name(), "f64.le");
    }

    #[test]
    fn operator_mapping() {
        assert_eq!(
            Opcode::from_plain_operator(&Operator::I64Rotl),
            Some(Opcode::I64Rotl)
        );
        assert_eq!(Opcode::from_plain_operator(&Operator::Nop), None);
        assert_eq!(
            Opcode::from_lane_operator(&Operator::F32x4ExtractLane { lane: 3 }),
            Some((Opcode::F32x4ExtractLane, 3))
        );
    }
}
