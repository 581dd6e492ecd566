use {
    crate::calls::template::CallTemplate,
    alloy_primitives::{Address, Bytes},
    anyhow::{Result, ensure},
    ethrpc::Call,
};

/// Expands per-contract templates into call groups, one group per contract,
/// with fields in template order.
///
/// Fields whose arguments are identical across all contracts are encoded
/// once and the calldata shared; fields with per-contract arguments are
/// encoded individually.
pub fn build_call_groups(entities: &[(Address, CallTemplate)]) -> Result<Vec<Vec<Call>>> {
    let Some((_, first)) = entities.first() else {
        return Ok(Vec::new());
    };
    for (_, template) in entities {
        ensure!(
            template.fields.len() == first.fields.len(),
            "call templates differ in field count"
        );
        for (field, reference) in template.fields.iter().zip(&first.fields) {
            ensure!(
                field.name == reference.name
                    && field.method.signature == reference.method.signature,
                "call templates differ in field order"
            );
        }
    }

    let static_encodings: Vec<Option<Bytes>> = first
        .fields
        .iter()
        .enumerate()
        .map(|(i, reference)| {
            entities
                .iter()
                .all(|(_, template)| template.fields[i].method.args == reference.method.args)
                .then(|| Bytes::from(reference.method.encode()))
        })
        .collect();

    Ok(entities
        .iter()
        .map(|(origin, template)| {
            template
                .fields
                .iter()
                .enumerate()
                .map(|(i, field)| Call {
                    target: *origin,
                    data: static_encodings[i]
                        .clone()
                        .unwrap_or_else(|| field.method.encode().into()),
                })
                .collect()
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::calls::template::{MethodCall, field},
        alloy_dyn_abi::{DynSolType, DynSolValue},
    };

    fn template(balance_of: Address) -> CallTemplate {
        CallTemplate {
            fields: vec![
                field(
                    "symbol",
                    MethodCall::new("symbol()", vec![], vec![DynSolType::String]),
                ),
                field(
                    "balance",
                    MethodCall::new(
                        "balanceOf(address)",
                        vec![DynSolValue::Address(balance_of)],
                        vec![DynSolType::Uint(256)],
                    ),
                ),
            ],
        }
    }

    #[test]
    fn groups_follow_template_field_order() {
        let entities = vec![
            (Address::repeat_byte(1), template(Address::repeat_byte(0xaa))),
            (Address::repeat_byte(2), template(Address::repeat_byte(0xbb))),
        ];
        let groups = build_call_groups(&entities).unwrap();
        assert_eq!(groups.len(), 2);
        for ((origin, template), group) in entities.iter().zip(&groups) {
            assert_eq!(group.len(), 2);
            for (field, call) in template.fields.iter().zip(group) {
                assert_eq!(call.target, *origin);
                assert_eq!(call.data[..4], field.method.selector());
            }
        }
        // Shared no-arg field encodes identically, per-contract args differ.
        assert_eq!(groups[0][0].data, groups[1][0].data);
        assert_ne!(groups[0][1].data, groups[1][1].data);
    }

    #[test]
    fn rejects_mismatched_templates() {
        let lopsided = CallTemplate {
            fields: vec![field(
                "symbol",
                MethodCall::new("symbol()", vec![], vec![DynSolType::String]),
            )],
        };
        let entities = vec![
            (Address::repeat_byte(1), template(Address::repeat_byte(0xaa))),
            (Address::repeat_byte(2), lopsided),
        ];
        assert!(build_call_groups(&entities).is_err());
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(build_call_groups(&[]).unwrap().is_empty());
    }
}
