use super::opcode::{Instruction, Operation};
use crate::asset::{ComponentType, FlowDefinition};
use crate::components::scpi::{
    SCPI_PART_COMMAND, SCPI_PART_END, SCPI_PART_EXPR, SCPI_PART_QUERY,
    SCPI_PART_QUERY_WITH_ASSIGNMENT, SCPI_PART_STRING,
};
use itertools::Itertools;
use std::fmt::{self, Write};

/// Formats one instruction stream, one word per line, up to its `End`.
pub fn disassemble(bytes: &[u8]) -> String {
    let mut output = String::new();
    // Writing into a String cannot fail.
    let _ = format_stream(&mut output, bytes, "");
    output
}

/// Formats every flow of a definition into a human-readable listing.
pub fn visualize_definition(definition: &FlowDefinition) -> String {
    let mut output = String::new();
    let _ = format_definition(&mut output, definition);
    output
}

fn format_definition(output: &mut String, definition: &FlowDefinition) -> fmt::Result {
    writeln!(output, "======== FLOW DEFINITION ========")?;

    writeln!(output, "\n--- CONSTANTS ---")?;
    for (i, constant) in definition.constants.iter().enumerate() {
        writeln!(output, "{:04}: {}", i, constant.to_value())?;
    }

    if !definition.global_variables.is_empty() {
        writeln!(output, "\n--- GLOBALS ---")?;
        for (i, global) in definition.global_variables.iter().enumerate() {
            writeln!(output, "{:04}: {}", i, global.to_value())?;
        }
    }

    for (flow_index, flow) in definition.flows.iter().enumerate() {
        writeln!(output, "\n--- FLOW #{} '{}' ---", flow_index, flow.name)?;
        writeln!(
            output,
            "inputs: [{}]",
            flow.component_inputs
                .iter()
                .map(|flags| input_flags(*flags))
                .join(", ")
        )?;
        if !flow.local_variables.is_empty() {
            writeln!(
                output,
                "locals: [{}]",
                flow.local_variables.iter().map(|l| l.to_value()).join(", ")
            )?;
        }

        for (index, component) in flow.components.iter().enumerate() {
            writeln!(
                output,
                "\n#{} {:?}{} inputs={:?}",
                index,
                component.component_type,
                if component.breakpoint { " [break]" } else { "" },
                component.inputs
            )?;
            for (p, property) in component.properties.iter().enumerate() {
                writeln!(output, "  property {}:", p)?;
                format_stream(output, &property.instructions, "    ")?;
            }
            if component.component_type == ComponentType::Scpi {
                writeln!(output, "  parts:")?;
                format_scpi_parts(output, &component.payload)?;
            }
            for (o, out) in component.outputs.iter().enumerate() {
                if out.connections.is_empty() {
                    continue;
                }
                let targets = out
                    .connections
                    .iter()
                    .map(|c| format!("#{}.{}", c.target_component, c.target_input))
                    .join(", ");
                let catch = if component.error_catch_output == Some(o as u16) {
                    " (catch)"
                } else {
                    ""
                };
                writeln!(output, "  out {}{} -> {}", o, catch, targets)?;
            }
        }
    }

    writeln!(output, "\n================ END OF DEFINITION ================")
}

fn input_flags(flags: u8) -> &'static str {
    match (
        flags & crate::asset::INPUT_FLAG_SEQ != 0,
        flags & crate::asset::INPUT_FLAG_OPTIONAL != 0,
    ) {
        (true, _) => "seq",
        (false, true) => "optional",
        (false, false) => "data",
    }
}

fn format_stream(output: &mut String, bytes: &[u8], indent: &str) -> fmt::Result {
    let mut offset = 0;
    loop {
        let Some(instruction) = Instruction::read(bytes, offset) else {
            return writeln!(output, "{}{:04}: <unterminated>", indent, offset / 2);
        };
        let line = match instruction {
            Instruction::PushConstant(i) => format!("{:<16} #{}", "PUSH_CONST", i),
            Instruction::PushInput(i) => format!("{:<16} #{}", "PUSH_INPUT", i),
            Instruction::PushLocal(i) => format!("{:<16} #{}", "PUSH_LOCAL", i),
            Instruction::PushGlobal(i) => format!("{:<16} #{}", "PUSH_GLOBAL", i),
            Instruction::PushOutput(i) => format!("{:<16} #{}", "PUSH_OUTPUT", i),
            Instruction::ArrayElement => "ARRAY_ELEMENT".to_string(),
            Instruction::Operation(i) => match Operation::from_index(i) {
                Some(operation) => format!("{:<16} {}", "OPERATION", operation.name()),
                None => format!("{:<16} ?{}", "OPERATION", i),
            },
            Instruction::End => "END".to_string(),
        };
        writeln!(output, "{}{:04}: {}", indent, offset / 2, line)?;
        offset += 2;
        if instruction == Instruction::End {
            return Ok(());
        }
    }
}

fn format_scpi_parts(output: &mut String, payload: &[u8]) -> fmt::Result {
    let mut cursor = 0;
    while let Some(&part) = payload.get(cursor) {
        let body = cursor + 1;
        match part {
            SCPI_PART_STRING => {
                let Some(length) = payload
                    .get(body..body + 2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as usize)
                else {
                    return writeln!(output, "    <truncated>");
                };
                let text = payload
                    .get(body + 2..body + 2 + length)
                    .map(String::from_utf8_lossy)
                    .unwrap_or_default();
                writeln!(output, "    STRING {:?}", text)?;
                cursor = body + 2 + length;
            }
            SCPI_PART_EXPR | SCPI_PART_QUERY_WITH_ASSIGNMENT => {
                let label = if part == SCPI_PART_EXPR {
                    "EXPR"
                } else {
                    "QUERY_WITH_ASSIGNMENT"
                };
                writeln!(output, "    {}", label)?;
                let stream = &payload[body..];
                format_stream(output, stream, "      ")?;
                cursor = body + stream_length(stream);
            }
            SCPI_PART_QUERY => {
                writeln!(output, "    QUERY")?;
                cursor = body;
            }
            SCPI_PART_COMMAND => {
                writeln!(output, "    COMMAND")?;
                cursor = body;
            }
            SCPI_PART_END => return writeln!(output, "    END"),
            other => return writeln!(output, "    <unknown part {}>", other),
        }
    }
    Ok(())
}

/// Byte length of a stream including its `End`, or the whole slice if unterminated.
fn stream_length(bytes: &[u8]) -> usize {
    let mut offset = 0;
    while let Some(instruction) = Instruction::read(bytes, offset) {
        offset += 2;
        if instruction == Instruction::End {
            return offset;
        }
    }
    bytes.len()
}
