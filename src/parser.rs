// The opcode tables: a primary 256-entry table keyed by instruction byte 0,
// with secondary tables behind the two-byte opcodes (01xx, A4xx-A7xx, B2xx,
// E4xx, E5xx). Every entry pairs the handler with its mnemonic so the
// mapping stays machine-readable; unused slots resolve to the
// operation-exception sink. Dispatch is one indexed jump, two for the
// secondary tables.

use crate::assist;
use crate::control;
use crate::decimal;
use crate::fields::{ExecResult, Exception};
use crate::float;
use crate::instructions;
use crate::io;
use crate::processor::Cpu;
use crate::xstore;

pub type OpFn = fn(&[u8], bool, &mut Cpu) -> ExecResult;

#[derive(Copy, Clone)]
pub struct OpEntry {
    pub exec: OpFn,
    pub mnemonic: &'static str,
}

const fn op(exec: OpFn, mnemonic: &'static str) -> OpEntry {
    OpEntry { exec, mnemonic }
}

const UNDEF: OpEntry = op(operation_exception, "");

/// Sink for every undefined opcode; the PSW still advances by the ILC the
/// leading byte implies.
pub fn operation_exception(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    if !execflag {
        cpu.psw.advance(ilc_of(inst[0]) as u8);
    }
    Err(Exception::Operation)
}

fn ilc_of(opcode: u8) -> usize {
    match opcode >> 6 {
        0 => 2,
        1 | 2 => 4,
        _ => 6,
    }
}

/// Execute one instruction image against a register context.
pub fn execute_instruction(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    (OPCODE_TABLE[inst[0] as usize].exec)(inst, execflag, cpu)
}

fn execute_01xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    (OPCODE_01XX[inst[1] as usize].exec)(inst, execflag, cpu)
}

fn execute_a4xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    // vector facility not installed
    operation_exception(inst, execflag, cpu)
}

fn execute_a5xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    operation_exception(inst, execflag, cpu)
}

fn execute_a6xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    operation_exception(inst, execflag, cpu)
}

fn execute_a7xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    (OPCODE_A7XX[(inst[1] & 0x0F) as usize].exec)(inst, execflag, cpu)
}

fn execute_b2xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    (OPCODE_B2XX[inst[1] as usize].exec)(inst, execflag, cpu)
}

fn execute_e4xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    operation_exception(inst, execflag, cpu)
}

fn execute_e5xx(inst: &[u8], execflag: bool, cpu: &mut Cpu) -> ExecResult {
    (OPCODE_E5XX[inst[1] as usize].exec)(inst, execflag, cpu)
}

/// Mnemonic and length of an instruction image, for the debugger pane and
/// the coverage checks.
pub fn disassemble(inst: &[u8]) -> (String, usize) {
    let ilc = ilc_of(inst[0]);
    let entry = match inst[0] {
        0x01 => &OPCODE_01XX[inst[1] as usize],
        0xA7 => &OPCODE_A7XX[(inst[1] & 0x0F) as usize],
        0xB2 => &OPCODE_B2XX[inst[1] as usize],
        0xE5 => &OPCODE_E5XX[inst[1] as usize],
        opcode => &OPCODE_TABLE[opcode as usize],
    };
    let mnemonic = if entry.mnemonic.is_empty() {
        String::from("dc")
    } else {
        String::from(entry.mnemonic)
    };
    (mnemonic, ilc)
}

pub static OPCODE_TABLE: [OpEntry; 256] = build_primary();

const fn build_primary() -> [OpEntry; 256] {
    let mut t = [UNDEF; 256];
    t[0x01] = op(execute_01xx, "01xx");
    t[0x04] = op(instructions::set_program_mask, "SPM");
    t[0x05] = op(instructions::branch_and_link_register, "BALR");
    t[0x06] = op(instructions::branch_on_count_register, "BCTR");
    t[0x07] = op(instructions::branch_on_condition_register, "BCR");
    t[0x08] = op(control::set_storage_key, "SSK");
    t[0x09] = op(control::insert_storage_key, "ISK");
    t[0x0A] = op(instructions::supervisor_call, "SVC");
    t[0x0B] = op(instructions::branch_and_set_mode, "BSM");
    t[0x0C] = op(instructions::branch_and_save_and_set_mode, "BASSM");
    t[0x0D] = op(instructions::branch_and_save_register, "BASR");
    t[0x0E] = op(instructions::move_long, "MVCL");
    t[0x0F] = op(instructions::compare_logical_long, "CLCL");
    t[0x10] = op(instructions::load_positive_register, "LPR");
    t[0x11] = op(instructions::load_negative_register, "LNR");
    t[0x12] = op(instructions::load_and_test_register, "LTR");
    t[0x13] = op(instructions::load_complement_register, "LCR");
    t[0x14] = op(instructions::and_register, "NR");
    t[0x15] = op(instructions::compare_logical_register, "CLR");
    t[0x16] = op(instructions::or_register, "OR");
    t[0x17] = op(instructions::exclusive_or_register, "XR");
    t[0x18] = op(instructions::load_register, "LR");
    t[0x19] = op(instructions::compare_register, "CR");
    t[0x1A] = op(instructions::add_register, "AR");
    t[0x1B] = op(instructions::subtract_register, "SR");
    t[0x1C] = op(instructions::multiply_register, "MR");
    t[0x1D] = op(instructions::divide_register, "DR");
    t[0x1E] = op(instructions::add_logical_register, "ALR");
    t[0x1F] = op(instructions::subtract_logical_register, "SLR");
    t[0x20] = op(float::load_positive_float_long_reg, "LPDR");
    t[0x21] = op(float::load_negative_float_long_reg, "LNDR");
    t[0x22] = op(float::load_and_test_float_long_reg, "LTDR");
    t[0x23] = op(float::load_complement_float_long_reg, "LCDR");
    t[0x24] = op(float::halve_float_long_reg, "HDR");
    t[0x25] = op(float::round_float_long_reg, "LRDR");
    t[0x26] = op(float::multiply_float_ext_reg, "MXR");
    t[0x27] = op(float::multiply_float_long_to_ext_reg, "MXDR");
    t[0x28] = op(float::load_float_long_reg, "LDR");
    t[0x29] = op(float::compare_float_long_reg, "CDR");
    t[0x2A] = op(float::add_float_long_reg, "ADR");
    t[0x2B] = op(float::subtract_float_long_reg, "SDR");
    t[0x2C] = op(float::multiply_float_long_reg, "MDR");
    t[0x2D] = op(float::divide_float_long_reg, "DDR");
    t[0x2E] = op(float::add_unnormal_float_long_reg, "AWR");
    t[0x2F] = op(float::subtract_unnormal_float_long_reg, "SWR");
    t[0x30] = op(float::load_positive_float_short_reg, "LPER");
    t[0x31] = op(float::load_negative_float_short_reg, "LNER");
    t[0x32] = op(float::load_and_test_float_short_reg, "LTER");
    t[0x33] = op(float::load_complement_float_short_reg, "LCER");
    t[0x34] = op(float::halve_float_short_reg, "HER");
    t[0x35] = op(float::round_float_short_reg, "LRER");
    t[0x36] = op(float::add_float_ext_reg, "AXR");
    t[0x37] = op(float::subtract_float_ext_reg, "SXR");
    t[0x38] = op(float::load_float_short_reg, "LER");
    t[0x39] = op(float::compare_float_short_reg, "CER");
    t[0x3A] = op(float::add_float_short_reg, "AER");
    t[0x3B] = op(float::subtract_float_short_reg, "SER");
    t[0x3C] = op(float::multiply_float_short_to_long_reg, "MER");
    t[0x3D] = op(float::divide_float_short_reg, "DER");
    t[0x3E] = op(float::add_unnormal_float_short_reg, "AUR");
    t[0x3F] = op(float::subtract_unnormal_float_short_reg, "SUR");
    t[0x40] = op(instructions::store_halfword, "STH");
    t[0x41] = op(instructions::load_address, "LA");
    t[0x42] = op(instructions::store_character, "STC");
    t[0x43] = op(instructions::insert_character, "IC");
    t[0x44] = op(instructions::execute, "EX");
    t[0x45] = op(instructions::branch_and_link, "BAL");
    t[0x46] = op(instructions::branch_on_count, "BCT");
    t[0x47] = op(instructions::branch_on_condition, "BC");
    t[0x48] = op(instructions::load_halfword, "LH");
    t[0x49] = op(instructions::compare_halfword, "CH");
    t[0x4A] = op(instructions::add_halfword, "AH");
    t[0x4B] = op(instructions::subtract_halfword, "SH");
    t[0x4C] = op(instructions::multiply_halfword, "MH");
    t[0x4D] = op(instructions::branch_and_save, "BAS");
    t[0x4E] = op(instructions::convert_to_decimal, "CVD");
    t[0x4F] = op(instructions::convert_to_binary, "CVB");
    t[0x50] = op(instructions::store, "ST");
    t[0x51] = op(instructions::load_address_extended, "LAE");
    t[0x54] = op(instructions::and, "N");
    t[0x55] = op(instructions::compare_logical, "CL");
    t[0x56] = op(instructions::or, "O");
    t[0x57] = op(instructions::exclusive_or, "X");
    t[0x58] = op(instructions::load, "L");
    t[0x59] = op(instructions::compare, "C");
    t[0x5A] = op(instructions::add, "A");
    t[0x5B] = op(instructions::subtract, "S");
    t[0x5C] = op(instructions::multiply, "M");
    t[0x5D] = op(instructions::divide, "D");
    t[0x5E] = op(instructions::add_logical_op, "AL");
    t[0x5F] = op(instructions::subtract_logical_op, "SL");
    t[0x60] = op(float::store_float_long, "STD");
    t[0x67] = op(float::multiply_float_long_to_ext, "MXD");
    t[0x68] = op(float::load_float_long, "LD");
    t[0x69] = op(float::compare_float_long, "CD");
    t[0x6A] = op(float::add_float_long, "AD");
    t[0x6B] = op(float::subtract_float_long, "SD");
    t[0x6C] = op(float::multiply_float_long, "MD");
    t[0x6D] = op(float::divide_float_long, "DD");
    t[0x6E] = op(float::add_unnormal_float_long, "AW");
    t[0x6F] = op(float::subtract_unnormal_float_long, "SW");
    t[0x70] = op(float::store_float_short, "STE");
    t[0x71] = op(instructions::multiply_single, "MS");
    t[0x78] = op(float::load_float_short, "LE");
    t[0x79] = op(float::compare_float_short, "CE");
    t[0x7A] = op(float::add_float_short, "AE");
    t[0x7B] = op(float::subtract_float_short, "SE");
    t[0x7C] = op(float::multiply_float_short_to_long, "ME");
    t[0x7D] = op(float::divide_float_short, "DE");
    t[0x7E] = op(float::add_unnormal_float_short, "AU");
    t[0x7F] = op(float::subtract_unnormal_float_short, "SU");
    t[0x80] = op(control::set_system_mask, "SSM");
    t[0x82] = op(control::load_psw, "LPSW");
    t[0x84] = op(instructions::branch_relative_on_index_high, "BRXH");
    t[0x85] = op(instructions::branch_relative_on_index_low_or_equal, "BRXLE");
    t[0x86] = op(instructions::branch_on_index_high, "BXH");
    t[0x87] = op(instructions::branch_on_index_low_or_equal, "BXLE");
    t[0x88] = op(instructions::shift_right_single_logical, "SRL");
    t[0x89] = op(instructions::shift_left_single_logical, "SLL");
    t[0x8A] = op(instructions::shift_right_single, "SRA");
    t[0x8B] = op(instructions::shift_left_single, "SLA");
    t[0x8C] = op(instructions::shift_right_double_logical, "SRDL");
    t[0x8D] = op(instructions::shift_left_double_logical, "SLDL");
    t[0x8E] = op(instructions::shift_right_double, "SRDA");
    t[0x8F] = op(instructions::shift_left_double, "SLDA");
    t[0x90] = op(instructions::store_multiple, "STM");
    t[0x91] = op(instructions::test_under_mask, "TM");
    t[0x92] = op(instructions::move_immediate, "MVI");
    t[0x93] = op(instructions::test_and_set, "TS");
    t[0x94] = op(instructions::and_immediate, "NI");
    t[0x95] = op(instructions::compare_logical_immediate, "CLI");
    t[0x96] = op(instructions::or_immediate, "OI");
    t[0x97] = op(instructions::exclusive_or_immediate, "XI");
    t[0x98] = op(instructions::load_multiple, "LM");
    t[0x99] = op(control::trace, "TRACE");
    t[0x9A] = op(instructions::load_access_multiple, "LAM");
    t[0x9B] = op(instructions::store_access_multiple, "STAM");
    t[0x9C] = op(io::s370_startio, "SIO");
    t[0x9D] = op(io::s370_testio, "TIO");
    t[0x9E] = op(io::s370_haltio, "HIO");
    t[0x9F] = op(io::s370_test_channel, "TCH");
    t[0xA4] = op(execute_a4xx, "A4xx");
    t[0xA5] = op(execute_a5xx, "A5xx");
    t[0xA6] = op(execute_a6xx, "A6xx");
    t[0xA7] = op(execute_a7xx, "A7xx");
    t[0xA8] = op(instructions::move_long_extended, "MVCLE");
    t[0xA9] = op(instructions::compare_logical_long_extended, "CLCLE");
    t[0xAC] = op(control::store_then_and_system_mask, "STNSM");
    t[0xAD] = op(control::store_then_or_system_mask, "STOSM");
    t[0xAE] = op(control::signal_processor, "SIGP");
    t[0xAF] = op(instructions::monitor_call, "MC");
    t[0xB1] = op(control::load_real_address, "LRA");
    t[0xB2] = op(execute_b2xx, "B2xx");
    t[0xB6] = op(control::store_control, "STCTL");
    t[0xB7] = op(control::load_control, "LCTL");
    t[0xBA] = op(instructions::compare_and_swap, "CS");
    t[0xBB] = op(instructions::compare_double_and_swap, "CDS");
    t[0xBD] = op(instructions::compare_logical_characters_under_mask, "CLM");
    t[0xBE] = op(instructions::store_characters_under_mask, "STCM");
    t[0xBF] = op(instructions::insert_characters_under_mask, "ICM");
    t[0xD1] = op(instructions::move_numerics, "MVN");
    t[0xD2] = op(instructions::move_character, "MVC");
    t[0xD3] = op(instructions::move_zones, "MVZ");
    t[0xD4] = op(instructions::and_character, "NC");
    t[0xD5] = op(instructions::compare_logical_character, "CLC");
    t[0xD6] = op(instructions::or_character, "OC");
    t[0xD7] = op(instructions::exclusive_or_character, "XC");
    t[0xD9] = op(control::move_with_key, "MVCK");
    t[0xDA] = op(control::move_to_primary, "MVCP");
    t[0xDB] = op(control::move_to_secondary, "MVCS");
    t[0xDC] = op(instructions::translate, "TR");
    t[0xDD] = op(instructions::translate_and_test, "TRT");
    t[0xDE] = op(decimal::edit_x_edit_and_mark, "ED");
    t[0xDF] = op(decimal::edit_x_edit_and_mark, "EDMK");
    t[0xE4] = op(execute_e4xx, "E4xx");
    t[0xE5] = op(execute_e5xx, "E5xx");
    t[0xE8] = op(instructions::move_inverse, "MVCIN");
    t[0xEE] = op(instructions::perform_locked_operation, "PLO");
    t[0xF0] = op(decimal::shift_and_round_decimal, "SRP");
    t[0xF1] = op(instructions::move_with_offset, "MVO");
    t[0xF2] = op(instructions::pack, "PACK");
    t[0xF3] = op(instructions::unpack, "UNPK");
    t[0xF8] = op(decimal::zero_and_add, "ZAP");
    t[0xF9] = op(decimal::compare_decimal, "CP");
    t[0xFA] = op(decimal::add_decimal, "AP");
    t[0xFB] = op(decimal::subtract_decimal, "SP");
    t[0xFC] = op(decimal::multiply_decimal, "MP");
    t[0xFD] = op(decimal::divide_decimal, "DP");
    t
}

pub static OPCODE_01XX: [OpEntry; 256] = build_01xx();

const fn build_01xx() -> [OpEntry; 256] {
    let mut t = [UNDEF; 256];
    t[0x07] = op(control::set_clock_programmable_field, "SCKPF");
    t
}

pub static OPCODE_A7XX: [OpEntry; 16] = build_a7xx();

const fn build_a7xx() -> [OpEntry; 16] {
    let mut t = [UNDEF; 16];
    t[0x0] = op(instructions::test_under_mask_high, "TMH");
    t[0x1] = op(instructions::test_under_mask_low, "TML");
    t[0x4] = op(instructions::branch_relative_on_condition, "BRC");
    t[0x5] = op(instructions::branch_relative_and_save, "BRAS");
    t[0x6] = op(instructions::branch_relative_on_count, "BRCT");
    t[0x8] = op(instructions::load_halfword_immediate, "LHI");
    t[0xA] = op(instructions::add_halfword_immediate, "AHI");
    t[0xC] = op(instructions::multiply_halfword_immediate, "MHI");
    t[0xE] = op(instructions::compare_halfword_immediate, "CHI");
    t
}

pub static OPCODE_B2XX: [OpEntry; 256] = build_b2xx();

const fn build_b2xx() -> [OpEntry; 256] {
    let mut t = [UNDEF; 256];
    t[0x02] = op(control::store_cpu_id, "STIDP");
    t[0x03] = op(io::s370_store_channelid, "STIDC");
    t[0x04] = op(control::set_clock, "SCK");
    t[0x05] = op(instructions::store_clock, "STCK");
    t[0x06] = op(control::set_clock_comparator, "SCKC");
    t[0x07] = op(control::store_clock_comparator, "STCKC");
    t[0x08] = op(control::set_cpu_timer, "SPT");
    t[0x09] = op(control::store_cpu_timer, "STPT");
    t[0x0A] = op(control::set_psw_key_from_address, "SPKA");
    t[0x0B] = op(control::insert_psw_key, "IPK");
    t[0x0D] = op(control::purge_tlb, "PTLB");
    t[0x10] = op(control::set_prefix, "SPX");
    t[0x11] = op(control::store_prefix, "STPX");
    t[0x12] = op(control::store_cpu_address, "STAP");
    t[0x13] = op(control::reset_reference_bit, "RRB");
    t[0x19] = op(control::set_address_space_control, "SAC");
    t[0x21] = op(control::invalidate_page_table_entry, "IPTE");
    t[0x22] = op(instructions::insert_program_mask, "IPM");
    t[0x23] = op(control::insert_virtual_storage_key, "IVSK");
    t[0x24] = op(control::insert_address_space_control, "IAC");
    t[0x25] = op(control::set_secondary_asn, "SSAR");
    t[0x26] = op(control::extract_primary_asn, "EPAR");
    t[0x27] = op(control::extract_secondary_asn, "ESAR");
    t[0x29] = op(control::insert_storage_key_extended, "ISKE");
    t[0x2A] = op(control::reset_reference_bit_extended, "RRBE");
    t[0x2B] = op(control::set_storage_key_extended, "SSKE");
    t[0x2C] = op(control::test_block, "TB");
    t[0x2D] = op(float::divide_float_ext_reg, "DXR");
    t[0x2E] = op(xstore::page_in, "PGIN");
    t[0x2F] = op(xstore::page_out, "PGOUT");
    t[0x30] = op(io::clear_subchannel, "CSCH");
    t[0x31] = op(io::halt_subchannel, "HSCH");
    t[0x32] = op(io::modify_subchannel, "MSCH");
    t[0x33] = op(io::start_subchannel, "SSCH");
    t[0x34] = op(io::store_subchannel, "STSCH");
    t[0x35] = op(io::test_subchannel, "TSCH");
    t[0x36] = op(io::test_pending_interruption, "TPI");
    t[0x37] = op(io::set_address_limit, "SAL");
    t[0x38] = op(io::resume_subchannel, "RSCH");
    t[0x39] = op(io::store_channel_report_word, "STCRW");
    t[0x3A] = op(io::store_channel_path_status, "STCPS");
    t[0x3B] = op(io::reset_channel_path, "RCHP");
    t[0x3C] = op(io::set_channel_monitor, "SCHM");
    t[0x41] = op(instructions::checksum, "CKSM");
    t[0x44] = op(float::squareroot_float_long_reg, "SQDR");
    t[0x45] = op(float::squareroot_float_short_reg, "SQER");
    t[0x46] = op(control::store_using_real_address, "STURA");
    t[0x48] = op(control::purge_alb, "PALB");
    t[0x4B] = op(control::load_using_real_address, "LURA");
    t[0x4D] = op(instructions::copy_access, "CPYA");
    t[0x4E] = op(instructions::set_access_register, "SAR");
    t[0x4F] = op(instructions::extract_access_register, "EAR");
    t[0x52] = op(instructions::multiply_single_register, "MSR");
    t[0x54] = op(xstore::move_page, "MVPG");
    t[0x55] = op(instructions::move_string, "MVST");
    t[0x57] = op(instructions::compare_until_substring_equal, "CUSE");
    t[0x59] = op(xstore::invalidate_expanded_storage_block_entry, "IESBE");
    t[0x5D] = op(instructions::compare_logical_string, "CLST");
    t[0x5E] = op(instructions::search_string, "SRST");
    t[0x62] = op(xstore::lock_page, "LKPG");
    t[0x78] = op(instructions::store_clock_extended, "STCKE");
    t[0x79] = op(control::set_address_space_control, "SACF");
    t[0xA5] = op(instructions::translate_extended, "TRE");
    t
}

pub static OPCODE_E5XX: [OpEntry; 256] = build_e5xx();

const fn build_e5xx() -> [OpEntry; 256] {
    let mut t = [UNDEF; 256];
    t[0x01] = op(control::test_protection, "TPROT");
    t[0x04] = op(assist::obtain_local_lock, "OBTL");
    t[0x05] = op(assist::release_local_lock, "RELL");
    t[0x06] = op(assist::obtain_cms_lock, "OBTC");
    t[0x07] = op(assist::release_cms_lock, "RELC");
    t
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::System;
    use std::sync::Arc;

    fn cpu() -> Cpu {
        Cpu::new(0, Arc::new(System::new(0x10000, 0, 1)))
    }

    #[test]
    fn undefined_opcodes_sink_to_operation_exception() {
        let mut cpu = cpu();
        cpu.psw.ia = 0x1002;
        assert_eq!(
            execute_instruction(&[0x00, 0x00], false, &mut cpu),
            Err(Exception::Operation)
        );
        // the PSW advanced past the bad instruction anyway
        assert_eq!(cpu.psw.ia, 0x1004);
        assert_eq!(cpu.psw.ilc, 2);
        assert_eq!(
            execute_instruction(&[0xFF, 0, 0, 0, 0, 0], false, &mut cpu),
            Err(Exception::Operation)
        );
        assert_eq!(cpu.psw.ilc, 6);
    }

    #[test]
    fn two_byte_opcodes_dispatch_through_secondary_tables() {
        let mut cpu = cpu();
        cpu.gpr[3] = 0;
        execute_instruction(&[0xA7, 0x38, 0xFF, 0xFE], false, &mut cpu).unwrap(); // LHI
        assert_eq!(cpu.gpr[3] as i32, -2);
        assert_eq!(
            execute_instruction(&[0xA7, 0x3F, 0, 0], false, &mut cpu),
            Err(Exception::Operation)
        );
        assert_eq!(
            execute_instruction(&[0xB2, 0xFF, 0, 0], false, &mut cpu),
            Err(Exception::Operation)
        );
        assert_eq!(
            execute_instruction(&[0xA4, 0x00, 0, 0], false, &mut cpu),
            Err(Exception::Operation)
        );
    }

    #[test]
    fn mnemonics_are_machine_readable() {
        assert_eq!(OPCODE_TABLE[0x1A].mnemonic, "AR");
        assert_eq!(OPCODE_TABLE[0xD2].mnemonic, "MVC");
        assert_eq!(OPCODE_B2XX[0x41].mnemonic, "CKSM");
        assert_eq!(OPCODE_E5XX[0x04].mnemonic, "OBTL");
        assert_eq!(disassemble(&[0xBA, 0x34, 0x20, 0x00, 0, 0]).0, "CS");
        assert_eq!(disassemble(&[0x00, 0, 0, 0, 0, 0]).0, "dc");
    }

    #[test]
    fn table_population_matches_the_architecture_level() {
        let primary = OPCODE_TABLE.iter().filter(|e| !e.mnemonic.is_empty()).count();
        // 2 one-byte table slots are forwarders for each of 01/A4-A7/B2/E4/E5
        assert!(primary > 150, "primary table lost entries: {}", primary);
        let b2 = OPCODE_B2XX.iter().filter(|e| !e.mnemonic.is_empty()).count();
        assert_eq!(b2, 63);
        let e5 = OPCODE_E5XX.iter().filter(|e| !e.mnemonic.is_empty()).count();
        assert_eq!(e5, 5);
        let a7 = OPCODE_A7XX.iter().filter(|e| !e.mnemonic.is_empty()).count();
        assert_eq!(a7, 9);
    }
}
