//! Suppression of the `AXEnhancedUserInterface` attribute.
//!
//! Some apps (notably anything embedding a web view) animate accessibility
//! moves while this attribute is set, which turns a batched layout pass into
//! a slide show. The mover clears it for the duration of a batch and puts it
//! back the way it found it.

use accessibility::AXUIElement;
use accessibility_sys::{
    AXError, AXUIElementCopyAttributeValue, AXUIElementSetAttributeValue, kAXErrorSuccess,
};
use core_foundation::base::{CFTypeRef, TCFType};
use core_foundation::boolean::{CFBoolean, CFBooleanRef};
use core_foundation::string::CFString;
use tracing::warn;

const K_AX_ENHANCED_USER_INTERFACE: &str = "AXEnhancedUserInterface";

fn read(element: &AXUIElement) -> bool {
    unsafe {
        let mut value: CFTypeRef = std::ptr::null();
        let error = AXUIElementCopyAttributeValue(
            element.as_concrete_TypeRef(),
            CFString::from_static_string(K_AX_ENHANCED_USER_INTERFACE).as_concrete_TypeRef(),
            &mut value,
        );
        if error == kAXErrorSuccess && !value.is_null() {
            CFBoolean::wrap_under_get_rule(value as CFBooleanRef).into()
        } else {
            false
        }
    }
}

fn write(element: &AXUIElement, enabled: bool) -> Result<(), AXError> {
    unsafe {
        let cf_bool = if enabled {
            CFBoolean::true_value()
        } else {
            CFBoolean::false_value()
        };
        let error = AXUIElementSetAttributeValue(
            element.as_concrete_TypeRef(),
            CFString::from_static_string(K_AX_ENHANCED_USER_INTERFACE).as_concrete_TypeRef(),
            cf_bool.as_CFTypeRef(),
        );
        if error == kAXErrorSuccess { Ok(()) } else { Err(error) }
    }
}

/// Clears `AXEnhancedUserInterface` on an app element for as long as the
/// guard lives, restoring the original value on drop. A no-op for apps that
/// never had the attribute set.
pub struct EnhancedUiSuppression<'a> {
    element: &'a AXUIElement,
    was_enabled: bool,
}

impl<'a> EnhancedUiSuppression<'a> {
    pub fn begin(element: &'a AXUIElement) -> EnhancedUiSuppression<'a> {
        let was_enabled = read(element);
        if was_enabled {
            if let Err(error) = write(element, false) {
                warn!("Failed to clear AXEnhancedUserInterface: {error:?}");
            }
        }
        EnhancedUiSuppression { element, was_enabled }
    }
}

impl Drop for EnhancedUiSuppression<'_> {
    fn drop(&mut self) {
        if self.was_enabled {
            if let Err(error) = write(self.element, true) {
                warn!("Failed to restore AXEnhancedUserInterface: {error:?}");
            }
        }
    }
}
