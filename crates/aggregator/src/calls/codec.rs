use {
    crate::calls::template::CallTemplate,
    alloy_dyn_abi::DynSolValue,
    alloy_primitives::{Address, U256},
    anyhow::{Result, ensure},
    ethrpc::CallOutcome,
};

/// One contract's decoded template fields. A field is `None` when its call
/// reverted or its return data did not decode as declared.
#[derive(Clone, Debug, PartialEq)]
pub struct DecodedRecord {
    pub origin: Address,
    values: Vec<(&'static str, Option<DynSolValue>)>,
}

impl DecodedRecord {
    pub fn value(&self, name: &str) -> Option<&DynSolValue> {
        self.values
            .iter()
            .find(|(field, _)| *field == name)
            .and_then(|(_, value)| value.as_ref())
    }

    pub fn uint(&self, name: &str) -> Option<U256> {
        self.value(name).and_then(|value| Some(value.as_uint()?.0))
    }

    pub fn small_uint(&self, name: &str) -> Option<u64> {
        self.uint(name).and_then(|value| u64::try_from(value).ok())
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        self.value(name).and_then(DynSolValue::as_address)
    }

    pub fn string(&self, name: &str) -> Option<String> {
        self.value(name)
            .and_then(DynSolValue::as_str)
            .map(str::to_owned)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.value(name).and_then(DynSolValue::as_bool)
    }

    pub fn address_array(&self, name: &str) -> Option<Vec<Address>> {
        self.value(name)?
            .as_array()?
            .iter()
            .map(DynSolValue::as_address)
            .collect()
    }

    /// Unpacks a two-value uint return like `effectiveReserveWeights()`.
    pub fn uint_pair(&self, name: &str) -> Option<(U256, U256)> {
        let values = self.value(name)?.as_fixed_seq()?;
        match values {
            [first, second] => Some((first.as_uint()?.0, second.as_uint()?.0)),
            _ => None,
        }
    }
}

/// Decodes one contract's call group. All outcomes must share an origin and
/// there must be exactly one outcome per template field; individual decode
/// failures are tolerated and surface as `None`.
pub fn decode_call_group(
    template: &CallTemplate,
    outcomes: &[(Address, CallOutcome)],
) -> Result<DecodedRecord> {
    let origin = outcomes
        .first()
        .map(|(origin, _)| *origin)
        .ok_or_else(|| anyhow::anyhow!("empty call group"))?;
    ensure!(
        outcomes.iter().all(|(address, _)| *address == origin),
        "was expecting all origin addresses to be the same"
    );
    ensure!(
        template.fields.len() == outcomes.len(),
        "was expecting as many outcomes as template fields"
    );

    let values = template
        .fields
        .iter()
        .zip(outcomes)
        .map(|(field, (_, outcome))| {
            let value = if outcome.success {
                match field.method.decode_returns(&outcome.data) {
                    Ok(value) => Some(value),
                    Err(err) => {
                        tracing::warn!(
                            field = field.name,
                            origin = ?origin,
                            ?err,
                            "failed to decode return data"
                        );
                        None
                    }
                }
            } else {
                None
            };
            (field.name, value)
        })
        .collect();

    Ok(DecodedRecord { origin, values })
}
