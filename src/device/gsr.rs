//! Raw GSR word to skin conductance.
//!
//! The 16-bit word carries the active feedback resistor range in bits 14..15
//! and a 12-bit ADC reading (3.0 V reference) in bits 0..11. The amplifier
//! output sits on a 0.5 V offset, so the skin resistance is
//! `Rf / (V / 0.5 - 1)`.

const ADC_REFERENCE_VOLTS: f64 = 3.0;
const ADC_FULL_SCALE: f64 = 4095.0;
const OFFSET_VOLTS: f64 = 0.5;

/// Feedback resistors in kΩ for ranges 0..=3.
const FEEDBACK_RESISTORS_KOHM: [f64; 4] = [40.2, 287.0, 1000.0, 3300.0];

pub fn gsr_range(raw: u16) -> usize {
    ((raw >> 14) & 0x03) as usize
}

/// Skin resistance in kΩ, or `None` when the reading is at or below the offset.
pub fn adc_to_resistance_kohm(raw: u16) -> Option<f64> {
    let adc = f64::from(raw & 0x0FFF);
    let volts = adc * ADC_REFERENCE_VOLTS / ADC_FULL_SCALE;
    let denominator = volts / OFFSET_VOLTS - 1.0;
    if denominator <= 0.0 {
        return None;
    }
    Some(FEEDBACK_RESISTORS_KOHM[gsr_range(raw)] / denominator)
}

/// Skin conductance in µS. Open-circuit readings map to 0.0.
pub fn adc_to_conductance(raw: u16) -> f64 {
    adc_to_resistance_kohm(raw)
        .map(|kohm| 1000.0 / kohm)
        .unwrap_or(0.0)
}
